//! The signaling hub (C4): the transport-agnostic control-plane handler,
//! concretely realized over a WebSocket upgraded from `/signaling` (§6.1).
//!
//! One [`run_connection`] call is the unit of work the worker pool (C3)
//! bounds — it owns the connection end to end through
//! `ACCEPTED -> AWAITING_REGISTER -> REGISTERED -> CLOSING -> CLOSED`
//! (§4.4.1). Reader and dispatcher run concurrently inside it, joined by a
//! bounded channel that drops frames on overflow rather than blocking the
//! reader (§4.4.1, §8 property 9); a third task drains the record's
//! outbound channel onto the socket under a write deadline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rdv_pool::WorkerPool;
use rdv_registry::{AdmitOutcome, ClientRecord, ConnectionHandle, Registry};
use rdv_types::EndpointAddr;
use rdv_wire::envelope::{Envelope, Sender};
use rdv_wire::messages::{ClientListEntry, ConnectPayload, NatDetectPayload};
use rdv_wire::{EnvelopePool, MessageType};

use crate::rendezvous;

/// Per-connection timing and buffering parameters, lifted out of
/// [`crate::config::ServerConfig`] so this module doesn't need to know the
/// config file's shape.
#[derive(Debug, Clone, Copy)]
pub struct HubLimits {
    pub message_buffer_size: usize,
    pub handshake_deadline: Duration,
    pub write_deadline: Duration,
}

impl Default for HubLimits {
    fn default() -> Self {
        Self {
            message_buffer_size: 64,
            handshake_deadline: Duration::from_secs(30),
            write_deadline: Duration::from_secs(10),
        }
    }
}

/// Shared state reachable from the axum handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub pool: Arc<WorkerPool>,
    pub limits: HubLimits,
    /// Scratch-buffer pool backing the reader/dispatcher handoff, shared
    /// process-wide rather than per-connection so steady-state traffic
    /// across many connections still amortizes allocation (§4.1).
    pub envelope_pool: Arc<EnvelopePool>,
}

/// Build the `/signaling` router. The caller is responsible for serving it
/// with connect-info enabled so `publicAddr` can be observed at accept time.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/signaling", get(signaling_ws_handler))
        .with_state(state)
}

async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // §8 S4: capacity is checked before the upgrade completes, against the
    // atomic counter, so a full registry never pays for a handshake it will
    // only deny.
    let max = state.registry.max_connections();
    if max > 0 && state.registry.active_count() >= max {
        warn!(%peer_addr, "rejecting upgrade: registry at capacity");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let registry = state.registry.clone();
    let pool = state.pool.clone();
    let limits = state.limits;
    let envelope_pool = state.envelope_pool.clone();
    ws.on_upgrade(move |socket| async move {
        let outcome = pool
            .submit(async move {
                run_connection(socket, peer_addr, registry, limits, envelope_pool).await;
            })
            .await;
        if let Err(err) = outcome {
            warn!(%peer_addr, error = %err, "worker pool rejected connection job");
        }
    })
}

/// Drive one accepted connection through its full lifecycle.
pub async fn run_connection(
    socket: WebSocket,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    limits: HubLimits,
    envelope_pool: Arc<EnvelopePool>,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(limits.message_buffer_size.max(1));
    let conn = ConnectionHandle::new(outbound_tx);
    let close_signal = conn.close_signal();

    let sender = match tokio::time::timeout(limits.handshake_deadline, await_register(&mut ws_rx)).await {
        Ok(Some(sender)) => sender,
        Ok(None) => {
            debug!(%peer_addr, "connection closed before completing handshake");
            return;
        }
        Err(_) => {
            debug!(%peer_addr, "handshake timed out awaiting register");
            return;
        }
    };

    let public_addr = EndpointAddr::from(peer_addr);
    let record = Arc::new(ClientRecord::new(
        sender.uid.clone(),
        sender.uid.to_string(),
        public_addr,
        public_addr,
        sender.token,
        conn,
    ));

    match registry.admit(record.clone()) {
        AdmitOutcome::Rejected(reason) => {
            debug!(id = %record.id, ?reason, "register denied");
            return;
        }
        AdmitOutcome::Admitted { evicted } => {
            if let Some(previous) = evicted {
                debug!(id = %record.id, "duplicate registration, closing previous connection");
                previous.request_close().await;
            }
        }
    }

    info!(id = %record.id, %peer_addr, "client registered");

    let writer = tokio::spawn(run_writer(ws_tx, outbound_rx, limits.write_deadline, close_signal.clone()));
    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(limits.message_buffer_size.max(1));

    tokio::join!(
        run_reader(ws_rx, frame_tx, record.clone(), close_signal.clone(), envelope_pool.clone()),
        run_dispatcher(frame_rx, registry.clone(), record.clone(), close_signal.clone(), envelope_pool),
    );

    // Identity-guarded: if this connection was itself displaced by a later
    // duplicate registration (§4.2 admit-evicts-duplicate), the registry
    // already holds a different record under `record.id` and must not be
    // disturbed by this teardown.
    registry.evict_if(&record.id, &record);
    record.request_close().await;
    let _ = writer.await;
    info!(id = %record.id, "connection closed");
}

/// AWAITING_REGISTER: read frames until a well-formed `register` with a
/// non-empty `sender.uid` arrives. Every other frame — wrong type,
/// malformed, empty uid — is logged and discarded without resetting the
/// deadline.
async fn await_register(ws_rx: &mut SplitStream<WebSocket>) -> Option<Sender> {
    loop {
        let msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(error = %err, "handshake read error");
                return None;
            }
            None => return None,
        };
        // One frame per handshake attempt, so there's no steady-state
        // allocation to amortize here; the pool only backs the
        // post-registration reader/dispatcher hot path.
        let bytes = match frame_bytes(msg, Vec::new()) {
            Some(Some(bytes)) => bytes,
            Some(None) => continue,
            None => return None,
        };
        let envelope = match Envelope::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "malformed frame during handshake, discarding");
                continue;
            }
        };
        if envelope.msg_type() != MessageType::Register {
            warn!(msg_type = %envelope.msg_type(), "non-register frame during handshake, discarding");
            continue;
        }
        if envelope.sender.uid.as_str().is_empty() {
            warn!("register with empty uid, discarding");
            continue;
        }
        return Some(envelope.sender);
    }
}

/// Reader: pushes raw frame bytes into the bounded `msgQ`, dropping on
/// overflow rather than blocking (§4.4.1, §8 property 9). Refreshes
/// `last_active` on every successful read.
async fn run_reader(
    mut ws_rx: SplitStream<WebSocket>,
    frame_tx: mpsc::Sender<Vec<u8>>,
    record: Arc<ClientRecord>,
    close_signal: CancellationToken,
    envelope_pool: Arc<EnvelopePool>,
) {
    loop {
        let msg = tokio::select! {
            _ = close_signal.cancelled() => return,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(id = %record.id, error = %err, "read error, closing connection");
                record.request_close().await;
                return;
            }
            None => {
                debug!(id = %record.id, "connection closed by peer");
                record.request_close().await;
                return;
            }
        };
        // Borrow a scratch buffer from the pool rather than allocating a
        // fresh `Vec` per frame; the dispatcher returns it once decoded.
        let buf = envelope_pool.acquire();
        let bytes = match frame_bytes(msg, buf) {
            Some(Some(bytes)) => bytes,
            Some(None) => continue,
            None => {
                record.request_close().await;
                return;
            }
        };
        record.touch();
        if let Err(err) = frame_tx.try_send(bytes) {
            warn!(id = %record.id, "inbound queue full, dropping frame");
            envelope_pool.release(err.into_inner());
        }
    }
}

/// Dispatcher: consumes `msgQ` in arrival order, decodes each frame from
/// the deferred-decoded envelope, refreshes `last_active`, and dispatches
/// by type (§4.4.2).
async fn run_dispatcher(
    mut frame_rx: mpsc::Receiver<Vec<u8>>,
    registry: Arc<Registry>,
    record: Arc<ClientRecord>,
    close_signal: CancellationToken,
    envelope_pool: Arc<EnvelopePool>,
) {
    loop {
        let frame = tokio::select! {
            _ = close_signal.cancelled() => return,
            frame = frame_rx.recv() => frame,
        };
        let Some(frame) = frame else { return };
        record.touch();
        let decoded = Envelope::decode(&frame);
        // The buffer is returned to the pool as soon as decoding is done
        // with it, whether decoding succeeded or not (§4.1's reset
        // contract: every field is cleared before the buffer is reused).
        envelope_pool.release(frame);
        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(id = %record.id, error = %err, "discarding malformed frame");
                continue;
            }
        };
        dispatch(&envelope, &registry, &record).await;
    }
}

async fn dispatch(envelope: &Envelope, registry: &Arc<Registry>, record: &Arc<ClientRecord>) {
    match envelope.msg_type() {
        MessageType::Register => {
            debug!(id = %record.id, "register received post-handshake, discarding");
        }
        MessageType::GetClientList => handle_get_client_list(registry, record).await,
        MessageType::Connect => handle_connect(envelope, registry, record).await,
        MessageType::NatDetect => handle_nat_detect(envelope, record).await,
        MessageType::Punch => {
            warn!(id = %record.id, "client sent a server-originated message type, discarding");
        }
    }
}

async fn handle_get_client_list(registry: &Registry, record: &Arc<ClientRecord>) {
    let entries: Vec<ClientListEntry> = registry
        .snapshot()
        .into_iter()
        .map(|view| ClientListEntry {
            uid: view.id,
            name: view.display_name,
            ip: view.public_addr.ip.to_string(),
            nat_type: view.nat_type,
        })
        .collect();
    let envelope = Envelope::new(
        Sender::server(),
        MessageType::GetClientList,
        serde_json::to_value(&entries).expect("client list always serializes"),
    );
    if !record.send(envelope.to_bytes()).await {
        record.request_close().await;
    }
}

async fn handle_connect(envelope: &Envelope, registry: &Registry, record: &Arc<ClientRecord>) {
    let payload: ConnectPayload = match envelope.payload_as(MessageType::Connect) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(id = %record.id, error = %err, "malformed connect payload, discarding");
            return;
        }
    };
    rendezvous::handle_connect(registry, record, payload.target_id).await;
}

async fn handle_nat_detect(envelope: &Envelope, record: &Arc<ClientRecord>) {
    let payload: NatDetectPayload = match envelope.payload_as(MessageType::NatDetect) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(id = %record.id, error = %err, "malformed nat_detect payload, discarding");
            return;
        }
    };
    record.set_nat_type(payload.nat_type);
    let reply = Envelope::new(
        Sender::server(),
        MessageType::NatDetect,
        serde_json::to_value(&payload).expect("nat_detect payload always serializes"),
    );
    if !record.send(reply.to_bytes()).await {
        record.request_close().await;
    }
}

/// Writer: drains the record's outbound channel onto the socket under a
/// bounded write deadline (§5). A deadline expiry or send error cancels
/// `close_signal` so the reader and dispatcher unwind too.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    write_deadline: Duration,
    close_signal: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = close_signal.cancelled() => None,
            frame = outbound_rx.recv() => frame,
        };
        let Some(frame) = frame else {
            let _ = ws_tx.close().await;
            return;
        };
        let text = String::from_utf8_lossy(&frame).into_owned();
        match tokio::time::timeout(write_deadline, ws_tx.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "write failed, closing connection");
                close_signal.cancel();
                return;
            }
            Err(_) => {
                warn!("write deadline exceeded, closing connection");
                close_signal.cancel();
                return;
            }
        }
    }
}

/// Extracts frame bytes from a WS message into a pool-provided scratch
/// `buf` (already empty — [`EnvelopePool::acquire`] guarantees that).
///
/// Returns `None` if the message means "stop reading" (a close frame),
/// `Some(None)` if the message carries no payload to decode (ping/pong —
/// `buf` is simply dropped), and `Some(Some(buf))` for text/binary frames.
fn frame_bytes(msg: Message, mut buf: Vec<u8>) -> Option<Option<Vec<u8>>> {
    match msg {
        Message::Text(text) => {
            buf.extend_from_slice(text.as_bytes());
            Some(Some(buf))
        }
        Message::Binary(bin) => {
            buf.extend_from_slice(&bin);
            Some(Some(buf))
        }
        Message::Close(_) => None,
        Message::Ping(_) | Message::Pong(_) => Some(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdv_types::{ClientId, NatType, SenderKind, SessionToken};
    use rdv_wire::envelope::Sender as WireSender;

    fn record_with_channel(id: &str) -> (Arc<ClientRecord>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        let record = Arc::new(ClientRecord::new(
            ClientId::from(id),
            format!("display-{id}"),
            EndpointAddr::new("203.0.113.1".parse().unwrap(), 1),
            EndpointAddr::new("192.168.0.1".parse().unwrap(), 2),
            SessionToken::empty(),
            ConnectionHandle::new(tx),
        ));
        (record, rx)
    }

    #[tokio::test]
    async fn get_client_list_replies_with_a_snapshot() {
        let registry = Registry::new(0);
        let (record, mut rx) = record_with_channel("a");
        registry.admit(record.clone());

        handle_get_client_list(&registry, &record).await;

        let bytes = rx.try_recv().expect("reply frame");
        let envelope = Envelope::decode(&bytes).expect("decode");
        assert_eq!(envelope.msg_type(), MessageType::GetClientList);
        let entries: Vec<ClientListEntry> = envelope.payload_as(MessageType::GetClientList).expect("payload");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].uid, ClientId::from("a"));
    }

    #[tokio::test]
    async fn nat_detect_persists_and_echoes_classification() {
        let (record, mut rx) = record_with_channel("a");
        let payload = NatDetectPayload {
            nat_type: NatType::Symmetric,
            symmetric: true,
        };
        let envelope = Envelope::new(
            WireSender {
                from: SenderKind::Client,
                uid: ClientId::from("a"),
                token: SessionToken::empty(),
            },
            MessageType::NatDetect,
            serde_json::to_value(&payload).unwrap(),
        );

        handle_nat_detect(&envelope, &record).await;

        assert_eq!(record.nat_type(), NatType::Symmetric);
        let bytes = rx.try_recv().expect("reply frame");
        let reply = Envelope::decode(&bytes).expect("decode");
        let reply_payload: NatDetectPayload = reply.payload_as(MessageType::NatDetect).expect("payload");
        assert_eq!(reply_payload.nat_type, NatType::Symmetric);
    }

    #[tokio::test]
    async fn connect_dispatch_delegates_to_rendezvous() {
        let registry = Registry::new(0);
        let (a, mut a_rx) = record_with_channel("a");
        let (b, mut b_rx) = record_with_channel("b");
        registry.admit(a.clone());
        registry.admit(b.clone());

        let payload = ConnectPayload {
            target_id: ClientId::from("b"),
        };
        let envelope = Envelope::new(
            WireSender {
                from: SenderKind::Client,
                uid: ClientId::from("a"),
                token: SessionToken::empty(),
            },
            MessageType::Connect,
            serde_json::to_value(&payload).unwrap(),
        );

        handle_connect(&envelope, &registry, &a).await;

        assert!(b_rx.try_recv().is_ok());
        assert!(a_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn malformed_connect_payload_is_discarded_without_panicking() {
        let registry = Registry::new(0);
        let (a, _a_rx) = record_with_channel("a");
        registry.admit(a.clone());

        let envelope = Envelope::new(
            WireSender {
                from: SenderKind::Client,
                uid: ClientId::from("a"),
                token: SessionToken::empty(),
            },
            MessageType::Connect,
            serde_json::json!({"unexpected": "shape"}),
        );

        handle_connect(&envelope, &registry, &a).await;
    }
}
