use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use rdv_types::{ClientId, SenderKind, SessionToken};

use crate::{Result, WireError};

/// Identifies the envelope's originator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub from: SenderKind,
    pub uid: ClientId,
    #[serde(default)]
    pub token: SessionToken,
}

impl Sender {
    /// A server-originated sender with no client identity, used when the
    /// hub replies on its own behalf (e.g. a `getClientList` response).
    pub fn server() -> Self {
        Self {
            from: SenderKind::Server,
            uid: ClientId::from(""),
            token: SessionToken::empty(),
        }
    }
}

/// The closed set of message types carried on the signaling channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageType {
    Register,
    GetClientList,
    Punch,
    Connect,
    NatDetect,
}

impl MessageType {
    fn as_wire_str(self) -> &'static str {
        match self {
            MessageType::Register => "register",
            MessageType::GetClientList => "getClientList",
            MessageType::Punch => "punch",
            MessageType::Connect => "connect",
            MessageType::NatDetect => "nat_detect",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "register" => Some(MessageType::Register),
            "getClientList" => Some(MessageType::GetClientList),
            "punch" => Some(MessageType::Punch),
            "connect" => Some(MessageType::Connect),
            "nat_detect" => Some(MessageType::NatDetect),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// The header fields as they appear on the wire, before the payload is
/// decoded into a concrete shape.
///
/// `deny_unknown_fields` rejects a top-level `to` (or any other stray
/// field) rather than silently ignoring it — routing is carried only by
/// the typed, payload-carried `targetId` on `connect` envelopes, never by
/// a top-level `To` (§9 Open Questions).
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireHeader {
    sender: Sender,
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default, rename = "message")]
    message: Option<serde_json::Value>,
}

/// The wire-format envelope, ready for serialization.
#[derive(Serialize)]
struct WireOut<'a> {
    sender: &'a Sender,
    #[serde(rename = "type")]
    msg_type: &'a str,
    message: &'a serde_json::Value,
}

/// A single parseable unit on the signaling channel: sender, type, and a
/// deferred-decoded payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: Sender,
    msg_type: MessageType,
    payload: serde_json::Value,
}

impl Envelope {
    /// Construct an envelope. Per the encode contract, a `None` payload
    /// becomes an empty object, never `null`.
    pub fn new(sender: Sender, msg_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            sender,
            msg_type,
            payload,
        }
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn payload_raw(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Serialize this envelope to bytes for transmission over a text frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let out = WireOut {
            sender: &self.sender,
            msg_type: self.msg_type.as_wire_str(),
            message: &self.payload,
        };
        // The shapes accepted here (Sender, MessageType, serde_json::Value)
        // are always representable in JSON; serialization cannot fail.
        serde_json::to_vec(&out).expect("envelope is always serializable")
    }

    /// Parse an envelope from bytes received off the wire.
    ///
    /// Fails with [`WireError::MalformedEnvelope`] if the frame is not
    /// well-formed structured text, or [`WireError::UnknownType`] if the
    /// `type` tag is not recognized.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header: WireHeader = serde_json::from_slice(bytes)
            .map_err(|e| WireError::MalformedEnvelope(e.to_string()))?;
        let msg_type = MessageType::parse(&header.msg_type)
            .ok_or_else(|| WireError::UnknownType(header.msg_type.clone()))?;
        let payload = header.message.unwrap_or_else(|| serde_json::json!({}));
        Ok(Self {
            sender: header.sender,
            msg_type,
            payload,
        })
    }

    /// Extract the payload into the caller's shape.
    ///
    /// Fails with [`WireError::TypeMismatch`] if `self.msg_type() != expected`,
    /// or [`WireError::PayloadSchema`] if the payload doesn't deserialize
    /// into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self, expected: MessageType) -> Result<T> {
        if self.msg_type != expected {
            return Err(WireError::TypeMismatch {
                expected,
                actual: self.msg_type,
            });
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| WireError::PayloadSchema(e.to_string()))
    }
}
