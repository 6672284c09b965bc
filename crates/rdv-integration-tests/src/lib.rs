//! Integration test crate for the rendezvous/signaling core.
//!
//! This crate has no library code — it only contains integration tests
//! that exercise a real `rdv-server` signaling hub end to end over a
//! loopback WebSocket connection.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p rdv-integration-tests
//! ```
