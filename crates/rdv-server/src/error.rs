use std::net::SocketAddr;

/// Errors specific to standing up and running the signaling hub itself.
/// Per-message protocol errors live in [`rdv_wire::WireError`]; this type
/// covers the things that can go wrong starting or operating a listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid listen address {0}: {1}")]
    InvalidAddr(String, std::net::AddrParseError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
