//! The rendezvous coordinator (C7): on a `connect` request from A targeting
//! B, emits symmetric `punch` payloads to both parties.
//!
//! Grounded directly on §4.7's five-step procedure. No persistent state of
//! its own — it only ever touches the registry (read) and two connection
//! handles (write).

use std::sync::Arc;

use tracing::{debug, warn};

use rdv_registry::{ClientRecord, Registry};
use rdv_types::ClientId;
use rdv_wire::envelope::{Envelope, Sender};
use rdv_wire::messages::PunchPayload;
use rdv_wire::MessageType;

/// Handle a `connect` request from `requester` targeting `target_id`.
///
/// If the target is not registered, this is a no-op from the hub's
/// perspective (§4.7 step 1 permits silence). Otherwise both parties
/// receive a `punch` envelope — target first, to give it a head start
/// opening its outbound mapping, then the requester. A write failure marks
/// only the failing peer for closing; the other side is not rolled back
/// (half-punches are an acceptable outcome; either peer may retry).
pub async fn handle_connect(registry: &Registry, requester: &Arc<ClientRecord>, target_id: ClientId) {
    let Some(target) = registry.lookup(&target_id) else {
        debug!(target = %target_id, "connect request for unknown target, ignoring");
        return;
    };

    let payload_for_target =
        PunchPayload::for_peer(requester.id.clone(), requester.public_addr, requester.local_addr);
    send_punch(&target, payload_for_target).await;

    let payload_for_requester =
        PunchPayload::for_peer(target.id.clone(), target.public_addr, target.local_addr);
    send_punch(requester, payload_for_requester).await;
}

async fn send_punch(recipient: &Arc<ClientRecord>, payload: PunchPayload) {
    let envelope = Envelope::new(
        Sender::server(),
        MessageType::Punch,
        serde_json::to_value(&payload).expect("PunchPayload always serializes"),
    );
    if !recipient.send(envelope.to_bytes()).await {
        warn!(peer = %recipient.id, "punch delivery failed, marking connection for close");
        recipient.request_close().await;
    }
}
