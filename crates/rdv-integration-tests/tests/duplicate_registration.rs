//! S3: registering an id that is already connected evicts the prior
//! connection instead of being refused.
//!
//! 1. Bind a fresh hub.
//! 2. Connect and register "desk-a" on connection 1.
//! 3. Connect and register "desk-a" again on connection 2.
//! 4. Connection 1 observes its socket close — waited out fully, not just
//!    slept past, so the displaced connection's own teardown (including its
//!    final registry bookkeeping) has actually run before step 5 checks the
//!    registry. Checking `active_count` on a fixed sleep instead of after
//!    this teardown genuinely completes would pass by race even if the
//!    displaced connection's teardown wrongly evicted the new occupant.
//! 5. The registry still holds exactly the newer connection.

mod support;

use futures_util::StreamExt;
use std::time::Duration;

#[tokio::test]
async fn duplicate_registration_evicts_the_older_connection() {
    let hub = support::spawn_hub(0, 64).await;

    let mut first = support::connect(hub.addr).await;
    support::register(&mut first, "desk-a").await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut second = support::connect(hub.addr).await;
    support::register(&mut second, "desk-a").await;

    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match first.next().await {
                None => return,
                Some(Err(_)) => return,
                Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) => continue,
                Some(Ok(other)) => panic!("expected the evicted connection to close, got {other:?}"),
            }
        }
    })
    .await;
    assert!(drained.is_ok(), "evicted connection did not close within the deadline");

    // The displaced connection's handler has now fully unwound (its socket
    // close observed above happens before its final registry teardown
    // runs), so this check is not racing that teardown.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(hub.registry.active_count(), 1, "only the newer connection should remain admitted");

    // The surviving connection is still the one registered, not merely
    // some connection: a GetClientList reply naming "desk-a" plus a
    // functioning round trip confirms the registry entry is `second`'s,
    // not a dangling one the evicted connection's teardown left behind.
    support::send(
        &mut second,
        support::client_sender("desk-a"),
        rdv_wire::MessageType::GetClientList,
        serde_json::json!({}),
    )
    .await;
    let reply = support::recv(&mut second).await;
    assert_eq!(reply.msg_type(), rdv_wire::MessageType::GetClientList);
    let entries: Vec<rdv_wire::messages::ClientListEntry> = reply
        .payload_as(rdv_wire::MessageType::GetClientList)
        .expect("client list payload");
    assert_eq!(entries.len(), 1, "exactly desk-a's surviving connection should be registered");
    assert_eq!(entries[0].uid, rdv_types::ClientId::from("desk-a"));
}
