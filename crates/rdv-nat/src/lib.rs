//! NAT behavioral discovery: a stateless UDP probe/response protocol plus a
//! reference client-side classifier.
//!
//! Grounded on `original_source/server/internal/ice/nat_detector.go`, with
//! one deliberate correction. The original compares the *source address of
//! each reply* across test1/test2/test3 — but if every probe socket simply
//! echoes from the socket it arrived on (the only sensible server
//! behavior), those source addresses differ by construction and the
//! comparison is always true, regardless of the client's actual NAT
//! behavior. The distilled classification step ("compare the mapped address
//! returned in test1 vs. test2") only works if the server instead echoes
//! back the address it *observed the client from* — proper STUN-style
//! reflection. This crate's wire format does that: every reply is ASCII
//! text `"<probe> <observed_ip>:<observed_port>"`, which still satisfies
//! "reply to testN echoes testN" (the tag is a prefix) while carrying the
//! information the algorithm actually needs.
pub mod classify;
pub mod probe_server;

pub use classify::{classify, NatEndpoints};
pub use probe_server::{NatEndpointConfig, NatProbeServer};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, thiserror::Error)]
pub enum NatError {
    #[error("failed to bind probe socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error on probe socket: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NatError>;

/// Whether `ip` is routable on the public internet. Loopback, link-local,
/// and the RFC 1918 private ranges are not; IPv6 is treated as public
/// unless loopback or unicast link-local (this protocol targets the IPv4
/// NAT traversal case the detector was built for).
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_ipv4(v4),
        IpAddr::V6(v6) => !(v6.is_loopback() || is_unicast_link_local_v6(v6)),
    }
}

fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    if ip.is_loopback() || ip.is_link_local() || ip.is_multicast() {
        return false;
    }
    const PRIVATE_RANGES: [(Ipv4Addr, Ipv4Addr); 3] = [
        (Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 255, 255, 255)),
        (Ipv4Addr::new(172, 16, 0, 0), Ipv4Addr::new(172, 31, 255, 255)),
        (Ipv4Addr::new(192, 168, 0, 0), Ipv4Addr::new(192, 168, 255, 255)),
    ];
    !PRIVATE_RANGES
        .iter()
        .any(|(start, end)| u32::from(ip) >= u32::from(*start) && u32::from(ip) <= u32::from(*end))
}

fn is_unicast_link_local_v6(ip: std::net::Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}
