//! The rendezvous/signaling server: binds the signaling hub, the auth
//! collaborator, and the NAT probe server behind one lifecycle supervisor.
//!
//! See [`config`] for the on-disk configuration shape, [`hub`] for the
//! per-connection state machine, [`rendezvous`] for the punch-coordination
//! logic it dispatches to, and [`supervisor`] for how the three services
//! and the reaper are brought up and torn down together.

pub mod config;
pub mod error;
pub mod hub;
pub mod rendezvous;
pub mod supervisor;

pub use config::ServerConfig;
pub use error::ServerError;
pub use supervisor::Supervisor;
