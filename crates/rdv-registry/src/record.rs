use std::sync::Mutex as StdMutex;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use rdv_types::{ClientId, EndpointAddr, NatType, SessionToken};

/// A handle to one connection's write side, held by the record that looks
/// it up. Cloning is cheap; every clone shares the same outbound channel
/// and close signal.
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<Vec<u8>>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            outbound,
            closer: CancellationToken::new(),
        }
    }

    /// Enqueue a frame for the connection's write task. Returns `false` if
    /// the connection has already closed.
    pub async fn send(&self, frame: Vec<u8>) -> bool {
        self.outbound.send(frame).await.is_ok()
    }

    /// Signal the owning connection task to close. Idempotent.
    pub fn request_close(&self) {
        self.closer.cancel();
    }

    pub fn close_signal(&self) -> CancellationToken {
        self.closer.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }
}

/// The registry's value type: everything known about one live endpoint.
///
/// `id`, `display_name`, `public_addr`, `local_addr`, and `token` are fixed
/// for the lifetime of the record. `conn` (the write-side handle) lives
/// behind an async mutex because sending a frame holds the lock across the
/// channel send; `nat_type` and `last_active` never need to be held across
/// an `.await`; so each is its own small sync-locked cell rather than one
/// combined mutex, which would otherwise force every `last_active` read to
/// go through async locking.
pub struct ClientRecord {
    pub id: ClientId,
    pub display_name: String,
    pub public_addr: EndpointAddr,
    pub local_addr: EndpointAddr,
    pub token: SessionToken,
    conn: AsyncMutex<ConnectionHandle>,
    nat_type: StdMutex<NatType>,
    last_active: StdMutex<Instant>,
}

impl ClientRecord {
    pub fn new(
        id: ClientId,
        display_name: String,
        public_addr: EndpointAddr,
        local_addr: EndpointAddr,
        token: SessionToken,
        conn: ConnectionHandle,
    ) -> Self {
        Self {
            id,
            display_name,
            public_addr,
            local_addr,
            token,
            conn: AsyncMutex::new(conn),
            nat_type: StdMutex::new(NatType::Unknown),
            last_active: StdMutex::new(Instant::now()),
        }
    }

    /// Enqueue `frame` on this record's connection. The record's own mutex
    /// serializes concurrent writers so frames from different dispatchers
    /// racing to reach the same peer are never interleaved.
    pub async fn send(&self, frame: Vec<u8>) -> bool {
        let conn = self.conn.lock().await;
        conn.send(frame).await
    }

    pub async fn request_close(&self) {
        let conn = self.conn.lock().await;
        conn.request_close();
    }

    pub async fn close_signal(&self) -> CancellationToken {
        let conn = self.conn.lock().await;
        conn.close_signal()
    }

    pub fn touch(&self) {
        let mut last_active = self.last_active.lock().unwrap_or_else(|e| e.into_inner());
        *last_active = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_nat_type(&self, nat_type: NatType) {
        *self.nat_type.lock().unwrap_or_else(|e| e.into_inner()) = nat_type;
    }

    pub fn nat_type(&self) -> NatType {
        *self.nat_type.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ClientRecord {
        let (tx, _rx) = mpsc::channel(4);
        ClientRecord::new(
            ClientId::from("a"),
            "desk-a".to_string(),
            EndpointAddr::new("203.0.113.1".parse().expect("ip"), 1),
            EndpointAddr::new("192.168.0.1".parse().expect("ip"), 2),
            SessionToken::empty(),
            ConnectionHandle::new(tx),
        )
    }

    #[tokio::test]
    async fn send_delivers_to_outbound_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let record = ClientRecord::new(
            ClientId::from("a"),
            "desk-a".to_string(),
            EndpointAddr::new("203.0.113.1".parse().expect("ip"), 1),
            EndpointAddr::new("192.168.0.1".parse().expect("ip"), 2),
            SessionToken::empty(),
            ConnectionHandle::new(tx),
        );
        assert!(record.send(b"hello".to_vec()).await);
        assert_eq!(rx.recv().await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn send_reports_closed_connection() {
        let (tx, rx) = mpsc::channel(4);
        let record = ClientRecord::new(
            ClientId::from("a"),
            "desk-a".to_string(),
            EndpointAddr::new("203.0.113.1".parse().expect("ip"), 1),
            EndpointAddr::new("192.168.0.1".parse().expect("ip"), 2),
            SessionToken::empty(),
            ConnectionHandle::new(tx),
        );
        drop(rx);
        assert!(!record.send(b"hello".to_vec()).await);
    }

    #[tokio::test]
    async fn request_close_cancels_close_signal() {
        let record = record();
        let signal = record.close_signal().await;
        assert!(!signal.is_cancelled());
        record.request_close().await;
        assert!(signal.is_cancelled());
    }

    #[test]
    fn nat_type_defaults_to_unknown_until_set() {
        let record = record();
        assert_eq!(record.nat_type(), NatType::Unknown);
        record.set_nat_type(NatType::FullCone);
        assert_eq!(record.nat_type(), NatType::FullCone);
    }

    #[test]
    fn touch_advances_last_active() {
        let record = record();
        let before = record.last_active();
        std::thread::sleep(std::time::Duration::from_millis(5));
        record.touch();
        assert!(record.last_active() > before);
    }
}
