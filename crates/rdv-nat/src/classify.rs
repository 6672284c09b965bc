//! The endpoint-side classifier: a reference implementation of the
//! five-step algorithm against a running [`crate::NatProbeServer`]. Used by
//! the integration suite to validate the probe protocol end to end, and
//! available to any endpoint embedding this crate directly.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rdv_types::NatType;
use tokio::net::UdpSocket;

use crate::is_public_ip;

/// The four addresses a classifying endpoint needs to know about the probe
/// server, mirroring [`crate::NatEndpointConfig`].
#[derive(Debug, Clone, Copy)]
pub struct NatEndpoints {
    pub primary: SocketAddr,
    pub primary_alt_port: SocketAddr,
    pub alternate: SocketAddr,
}

const PROBE_DEADLINE: Duration = Duration::from_secs(2);

struct ProbeReply {
    observed: SocketAddr,
}

async fn probe_and_wait(socket: &UdpSocket, dest: SocketAddr, probe: &str) -> Option<ProbeReply> {
    socket.send_to(probe.as_bytes(), dest).await.ok()?;
    let mut buf = [0u8; 512];
    let (n, _) = tokio::time::timeout(PROBE_DEADLINE, socket.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;
    let text = std::str::from_utf8(&buf[..n]).ok()?;
    parse_reply(text)
}

fn parse_reply(text: &str) -> Option<ProbeReply> {
    let mut parts = text.split_whitespace();
    let _tag = parts.next()?;
    let observed: SocketAddr = parts.next()?.parse().ok()?;
    Some(ProbeReply { observed })
}

/// Classify the NAT sitting in front of `socket`, per §4.6:
///
/// 1. A public local IP needs no NAT traversal: [`NatType::None`].
/// 2. test1 to the primary address; no reply at all means [`NatType::Unknown`].
/// 3. test2 to the primary's alternate port; a different observed port than
///    test1 means [`NatType::Symmetric`].
/// 4. test3 to the alternate address; a different observed address than
///    test1 means [`NatType::Symmetric`].
/// 5. test4 asks the primary to relay a reply via the alternate socket to
///    the test1 mapping; arriving means [`NatType::FullCone`]. If it times
///    out, test4b repeats the ask from a second, never-contacted port on
///    the same alternate IP: arriving distinguishes [`NatType::RestrictedCone`]
///    (filtering keyed on IP alone) from [`NatType::PortRestricted`] (exact
///    `(ip, port)` required).
pub async fn classify(socket: &UdpSocket, local_ip: IpAddr, endpoints: &NatEndpoints) -> NatType {
    if is_public_ip(local_ip) {
        return NatType::None;
    }

    let Some(r1) = probe_and_wait(socket, endpoints.primary, "test1").await else {
        return NatType::Unknown;
    };

    if let Some(r2) = probe_and_wait(socket, endpoints.primary_alt_port, "test2").await {
        if r1.observed.port() != r2.observed.port() {
            return NatType::Symmetric;
        }
    }

    if let Some(r3) = probe_and_wait(socket, endpoints.alternate, "test3").await {
        if r1.observed != r3.observed {
            return NatType::Symmetric;
        }
    }

    if probe_and_wait(socket, endpoints.primary, "test4").await.is_some() {
        return NatType::FullCone;
    }

    if probe_and_wait(socket, endpoints.primary, "test4b").await.is_some() {
        return NatType::RestrictedCone;
    }

    NatType::PortRestricted
}
