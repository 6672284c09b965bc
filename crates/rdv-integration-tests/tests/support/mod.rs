//! Shared harness for driving a real signaling hub over a loopback
//! WebSocket connection. Each test binds its own hub on an OS-assigned
//! port, so tests never contend over a fixed port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use rdv_pool::{PoolConfig, WorkerPool};
use rdv_registry::Registry;
use rdv_server::hub::{self, AppState, HubLimits};
use rdv_types::{ClientId, SenderKind, SessionToken};
use rdv_wire::envelope::{Envelope, Sender};
use rdv_wire::{EnvelopePool, MessageType};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A hub bound for one test, plus the registry it shares with the hub's
/// connections (so a test can inspect state the wire protocol doesn't
/// surface directly, like forcing a reap).
pub struct TestHub {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
}

pub async fn spawn_hub(max_connections: usize, message_buffer_size: usize) -> TestHub {
    let registry = Arc::new(Registry::new(max_connections));
    let pool = Arc::new(WorkerPool::new(PoolConfig {
        size: 16,
        ..PoolConfig::default()
    }));
    let state = Arc::new(AppState {
        registry: registry.clone(),
        pool,
        limits: HubLimits {
            message_buffer_size,
            ..HubLimits::default()
        },
        envelope_pool: Arc::new(EnvelopePool::new(message_buffer_size.max(1) * 4)),
    });
    let router = hub::router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
        let _ = axum::serve(listener, make_service).await;
    });
    TestHub { addr, registry }
}

pub async fn connect(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/signaling");
    let (stream, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
    stream
}

pub fn client_sender(uid: &str) -> Sender {
    Sender {
        from: SenderKind::Client,
        uid: ClientId::from(uid),
        token: SessionToken::empty(),
    }
}

pub async fn send(ws: &mut WsStream, sender: Sender, msg_type: MessageType, payload: serde_json::Value) {
    let envelope = Envelope::new(sender, msg_type, payload);
    let text = String::from_utf8(envelope.to_bytes()).expect("envelope bytes are utf8");
    ws.send(WsMessage::Text(text.into())).await.expect("send frame");
}

pub async fn register(ws: &mut WsStream, uid: &str) {
    send(ws, client_sender(uid), MessageType::Register, serde_json::json!({})).await;
}

/// Wait up to 2 seconds for the next envelope, panicking on timeout —
/// use when the test expects a reply and a missing one is a failure.
pub async fn recv(ws: &mut WsStream) -> Envelope {
    recv_within(ws, Duration::from_secs(2))
        .await
        .expect("expected a frame before the deadline")
}

/// Wait up to `timeout` for the next envelope, returning `None` on
/// timeout or stream close — use when the test is asserting silence.
pub async fn recv_within(ws: &mut WsStream, timeout: Duration) -> Option<Envelope> {
    match tokio::time::timeout(timeout, ws.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => Some(Envelope::decode(text.as_bytes()).expect("decode envelope")),
        Ok(Some(Ok(WsMessage::Binary(bin)))) => Some(Envelope::decode(&bin).expect("decode envelope")),
        Ok(Some(Ok(_))) => None,
        Ok(Some(Err(_))) | Ok(None) | Err(_) => None,
    }
}
