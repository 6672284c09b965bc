//! Shared identifiers and value types for the rendezvous/signaling core.
//!
//! Every other `rdv-*` crate depends on this one for the handful of types
//! that cross crate boundaries: client identity, session tokens, NAT
//! classification, and the `(ip, port)` pair used for both public and local
//! addresses.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// A stable, opaque identity for one endpoint. Machine-derived; the server
/// has no opinion on how it was derived (hostname, machine-id, or otherwise
/// — a deployment choice left to the caller of `Registry::admit`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An opaque token issued by the auth collaborator. Never parsed by this
/// crate or its callers — only echoed back on outbound envelopes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are secrets in spirit even though nothing here validates their
// contents; never print them.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which side of a connection produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Client,
    Server,
}

/// NAT behavioral classification, as determined by the five-step algorithm
/// in the NAT discovery component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NatType {
    #[default]
    Unknown,
    None,
    FullCone,
    RestrictedCone,
    PortRestricted,
    Symmetric,
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatType::Unknown => "unknown",
            NatType::None => "none",
            NatType::FullCone => "fullCone",
            NatType::RestrictedCone => "restrictedCone",
            NatType::PortRestricted => "portRestricted",
            NatType::Symmetric => "symmetric",
        };
        f.write_str(s)
    }
}

/// An `(ip, port)` pair, used for both `publicAddr` (observed at accept
/// time) and `localAddr` (self-reported at registration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddr {
    pub ip: IpAddr,
    pub port: u16,
}

impl EndpointAddr {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<std::net::SocketAddr> for EndpointAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}
