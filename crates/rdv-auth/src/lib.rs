//! The auth collaborator: a typed `Login` RPC on a dedicated port, with an
//! opaque credential policy behind [`PolicyStore`].
//!
//! Frames requests as newline-delimited JSON (`BufReader::read_line` in, a
//! trailing `\n`-terminated `serde_json` object out) over a plain TCP
//! listener, narrowed from general JSON-RPC dispatch to the single `Login`
//! method this component exposes — the same JSON-over-a-stream idiom
//! `rdv-wire` uses for the signaling channel, rather than a bespoke binary
//! encoding.

pub mod client;
pub mod policy;
pub mod server;

pub use client::AuthClient;
pub use policy::PolicyStore;
pub use server::AuthServer;

use serde::{Deserialize, Serialize};

/// Outcome of a `Login` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCode {
    Ok,
    InvalidUsername,
    InvalidPassword,
    RateLimited,
    Unavailable,
}

impl AuthCode {
    pub fn as_wire(self) -> u16 {
        match self {
            AuthCode::Ok => 0,
            AuthCode::InvalidUsername => 1,
            AuthCode::InvalidPassword => 2,
            AuthCode::RateLimited => 3,
            AuthCode::Unavailable => 4,
        }
    }

    pub fn from_wire(code: u16) -> Option<Self> {
        match code {
            0 => Some(AuthCode::Ok),
            1 => Some(AuthCode::InvalidUsername),
            2 => Some(AuthCode::InvalidPassword),
            3 => Some(AuthCode::RateLimited),
            4 => Some(AuthCode::Unavailable),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, AuthCode::Ok)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl LoginResponse {
    pub fn new(code: AuthCode, token: Option<String>) -> Self {
        Self {
            code: code.as_wire(),
            token: if code.is_ok() { token } else { None },
        }
    }

    pub fn code(&self) -> Option<AuthCode> {
        AuthCode::from_wire(self.code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth connection i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed auth request/response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("auth connection closed before a reply was received")]
    ConnectionClosed,
    #[error("auth server unreachable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
