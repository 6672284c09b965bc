//! `rdv-server`: the rendezvous/signaling core's binary entrypoint.
//!
//! Loads configuration, initializes tracing, wires a credential policy,
//! and hands off to the supervisor. This server keeps no on-disk state of
//! its own, so there is no data-directory or database step.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use rdv_auth::policy::StaticPolicyStore;
use rdv_server::config::Environment;
use rdv_server::{ServerConfig, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(config.environment);

    info!(environment = ?config.environment, "rdv-server starting");

    // The credential policy's wire contract is in scope here, not its
    // backing store (see `rdv_auth::policy`): a real deployment supplies
    // its own `PolicyStore`. The empty table rejects every login until one
    // is wired in.
    let policy = Arc::new(StaticPolicyStore::new(HashMap::new()));

    let supervisor = Supervisor::new(config, policy);
    supervisor.run().await
}

fn init_tracing(environment: Environment) {
    let default_directive = match environment {
        Environment::Development => {
            "rdv_server=debug,rdv_registry=debug,rdv_pool=debug,rdv_nat=debug,rdv_auth=debug,rdv_wire=debug"
        }
        Environment::Production => "rdv_server=info,rdv_registry=info,rdv_pool=info,rdv_nat=info,rdv_auth=info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match environment {
        Environment::Development => subscriber.init(),
        Environment::Production => subscriber.json().init(),
    }
}
