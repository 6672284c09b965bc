//! S5: an idle client is reaped once it has been quiet past the idle
//! horizon, and reaping closes its connection.
//!
//! 1. Bind a fresh hub.
//! 2. Register "desk-a" and let it sit idle.
//! 3. Force a reap pass with a short idle horizon.
//! 4. "desk-a" is gone from the registry and its socket closes.

mod support;

use futures_util::StreamExt;
use std::time::{Duration, Instant};

#[tokio::test]
async fn idle_client_is_reaped_and_disconnected() {
    let hub = support::spawn_hub(0, 64).await;

    let mut ws = support::connect(hub.addr).await;
    support::register(&mut ws, "desk-a").await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(hub.registry.active_count(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let reaped = hub.registry.reap(Instant::now(), Duration::from_millis(10)).await;
    assert_eq!(reaped.len(), 1, "the idle client should be reaped");
    assert_eq!(hub.registry.active_count(), 0);

    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match ws.next().await {
                None => return,
                Some(Err(_)) => return,
                Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) => continue,
                Some(Ok(other)) => panic!("expected the reaped connection to close, got {other:?}"),
            }
        }
    })
    .await;
    assert!(drained.is_ok(), "reaped connection did not close within the deadline");
}
