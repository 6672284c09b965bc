//! Typed payload shapes, one per [`crate::MessageType`] variant, matching
//! the wire schema in §6.1. These are extracted from (or embedded into) an
//! [`crate::Envelope`]'s deferred-decoded `message` field via `payload_as`.

use serde::{Deserialize, Serialize};

use rdv_types::{ClientId, EndpointAddr, NatType};

/// `connect` request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectPayload {
    #[serde(rename = "targetId")]
    pub target_id: ClientId,
}

/// `punch` payload, sent to both parties of a pending rendezvous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchPayload {
    #[serde(rename = "peerId")]
    pub peer_id: ClientId,
    #[serde(rename = "publicIp")]
    pub public_ip: String,
    #[serde(rename = "publicPort")]
    pub public_port: u16,
    #[serde(rename = "localIp")]
    pub local_ip: String,
    #[serde(rename = "localPort")]
    pub local_port: u16,
}

impl PunchPayload {
    pub fn for_peer(peer_id: ClientId, public_addr: EndpointAddr, local_addr: EndpointAddr) -> Self {
        Self {
            peer_id,
            public_ip: public_addr.ip.to_string(),
            public_port: public_addr.port,
            local_ip: local_addr.ip.to_string(),
            local_port: local_addr.port,
        }
    }
}

/// `nat_detect` payload, carrying the endpoint's self-reported classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatDetectPayload {
    #[serde(rename = "type")]
    pub nat_type: NatType,
    pub symmetric: bool,
}

/// One entry in a `getClientList` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientListEntry {
    pub uid: ClientId,
    pub name: String,
    pub ip: String,
    #[serde(rename = "natType")]
    pub nat_type: NatType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nat_detect_payload_round_trips() {
        let payload = NatDetectPayload {
            nat_type: NatType::Symmetric,
            symmetric: true,
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["type"], "symmetric");
        let back: NatDetectPayload = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.nat_type, NatType::Symmetric);
    }

    #[test]
    fn client_list_entry_field_names() {
        let entry = ClientListEntry {
            uid: ClientId::from("a"),
            name: "desk-a".to_string(),
            ip: "203.0.113.5".to_string(),
            nat_type: NatType::FullCone,
        };
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["natType"], "fullCone");
    }
}
