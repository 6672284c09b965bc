//! Wire-protocol message envelope for the signaling channel.
//!
//! Every message exchanged between an endpoint and the hub is wrapped in an
//! [`envelope::Envelope`]. The envelope is JSON-serialized for transmission
//! over a WebSocket text frame.
//!
//! ## Wire format
//!
//! ```text
//! { "sender": { "from": "client"|"server", "uid": "...", "token": "..." },
//!   "type": "register" | "getClientList" | "punch" | "connect" | "nat_detect",
//!   "message": <type-dependent> }
//! ```
//!
//! The payload is deferred-decoded: [`envelope::Envelope::decode`] only
//! parses the envelope header and leaves `message` as a `serde_json::Value`
//! until [`envelope::Envelope::payload_as`] extracts it into a concrete
//! shape. This avoids a single open polymorphic payload field, which the
//! design notes call out as a historical source of cast bugs.

pub mod envelope;
pub mod messages;
pub mod pool;

pub use envelope::{Envelope, MessageType, Sender};
pub use pool::EnvelopePool;

/// Errors produced while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame was not well-formed structured text.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The `type` tag was not one of the recognized message types.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// `payload_as` was called with a type that doesn't match the
    /// envelope's actual type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: MessageType,
        actual: MessageType,
    },

    /// The payload did not match the schema expected for its declared type.
    #[error("payload schema error: {0}")]
    PayloadSchema(String),
}

/// Convenience result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
