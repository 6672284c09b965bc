//! The server side of the probe/response protocol: binds four UDP
//! sockets (primary, primary's alternate port, alternate address, and the
//! alternate address's alternate port) and replies to each recognized
//! probe from the socket the algorithm calls for.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{NatError, Result};

/// The four addresses the discovery protocol needs. In a single-homed test
/// environment `primary`/`primary_alt_port` share an IP and differ only in
/// port, and likewise for `alternate`/`alternate_alt_port`; in production
/// `primary*` and `alternate*` are expected to be genuinely different public
/// IPs.
#[derive(Debug, Clone, Copy)]
pub struct NatEndpointConfig {
    pub primary: SocketAddr,
    pub primary_alt_port: SocketAddr,
    pub alternate: SocketAddr,
    pub alternate_alt_port: SocketAddr,
}

const TEST1: &str = "test1";
const TEST2: &str = "test2";
const TEST3: &str = "test3";
const TEST4: &str = "test4";
const TEST4B: &str = "test4b";

/// A bound, running probe responder. `run` drives all three receive loops
/// until `cancel` fires.
pub struct NatProbeServer {
    primary: Arc<UdpSocket>,
    primary_alt_port: Arc<UdpSocket>,
    alternate: Arc<UdpSocket>,
    alternate_alt_port: Arc<UdpSocket>,
}

impl NatProbeServer {
    pub async fn bind(config: NatEndpointConfig) -> Result<Self> {
        Ok(Self {
            primary: Arc::new(bind_socket(config.primary).await?),
            primary_alt_port: Arc::new(bind_socket(config.primary_alt_port).await?),
            alternate: Arc::new(bind_socket(config.alternate).await?),
            alternate_alt_port: Arc::new(bind_socket(config.alternate_alt_port).await?),
        })
    }

    /// Drive the responder until `cancel` fires. Runs the primary,
    /// primary-alt-port, and alternate receive loops concurrently;
    /// `alternate_alt_port` is send-only, sourcing test4b replies.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let primary_loop = self.clone().run_primary(cancel.clone());
        let alt_port_loop = Self::echo_loop(self.primary_alt_port.clone(), TEST2, cancel.clone());
        let alternate_loop = Self::echo_loop(self.alternate.clone(), TEST3, cancel.clone());

        tokio::join!(primary_loop, alt_port_loop, alternate_loop);
    }

    /// The primary socket answers test1 directly, and relays test4/test4b
    /// replies via the alternate sockets on the client's behalf.
    async fn run_primary(self: Arc<Self>, cancel: CancellationToken) {
        let mut buf = [0u8; 1024];
        loop {
            let (n, src) = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.primary.recv_from(&mut buf) => match result {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "nat probe primary recv failed");
                        continue;
                    }
                },
            };
            let Ok(text) = std::str::from_utf8(&buf[..n]) else {
                continue;
            };
            let reply = format!("{} {src}", text.trim());
            let (socket, label): (&Arc<UdpSocket>, &str) = match text.trim() {
                TEST1 => (&self.primary, TEST1),
                TEST4 => (&self.alternate, TEST4),
                TEST4B => (&self.alternate_alt_port, TEST4B),
                other => {
                    debug!(probe = other, "nat probe server: unrecognized probe on primary");
                    continue;
                }
            };
            if let Err(err) = socket.send_to(reply.as_bytes(), src).await {
                warn!(error = %err, probe = label, "nat probe reply failed");
            }
        }
    }

    /// A socket that always echoes `"<tag> <observed src>"` to whoever sent
    /// it `tag`, from itself. Used for test2 (primary_alt_port) and test3
    /// (alternate).
    async fn echo_loop(socket: Arc<UdpSocket>, tag: &'static str, cancel: CancellationToken) {
        let mut buf = [0u8; 1024];
        loop {
            let (n, src) = tokio::select! {
                _ = cancel.cancelled() => return,
                result = socket.recv_from(&mut buf) => match result {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, tag, "nat probe echo recv failed");
                        continue;
                    }
                },
            };
            if buf[..n].trim_ascii() != tag.as_bytes() {
                continue;
            }
            let reply = format!("{tag} {src}");
            if let Err(err) = socket.send_to(reply.as_bytes(), src).await {
                warn!(error = %err, tag, "nat probe echo reply failed");
            }
        }
    }
}

async fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| NatError::Bind { addr, source })
}
