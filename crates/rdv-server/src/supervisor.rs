//! The lifecycle supervisor (C8): brings up the signaling hub, auth
//! collaborator, and NAT probe server together, runs a periodic reaper
//! alongside them, and propagates one shutdown signal to every long-running
//! task through a shared [`CancellationToken`].
//!
//! Startup brings up each service in turn; shutdown races a first
//! `ctrl_c()` against the running services, then cancels a shared
//! [`CancellationToken`] so every task — including ones with no dedicated
//! shutdown channel, like the reaper — unwinds off the same signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rdv_auth::{AuthServer, PolicyStore};
use rdv_nat::{NatEndpointConfig, NatProbeServer};
use rdv_pool::WorkerPool;
use rdv_registry::Registry;
use rdv_wire::EnvelopePool;

use crate::config::{ListenConfig, ServerConfig};
use crate::error::ServerError;
use crate::hub::{self, AppState, HubLimits};

/// How long a shutdown waits for in-flight work to drain before forcing it.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config: ServerConfig,
    registry: Arc<Registry>,
    pool: Arc<WorkerPool>,
    policy: Arc<dyn PolicyStore>,
}

impl Supervisor {
    pub fn new(config: ServerConfig, policy: Arc<dyn PolicyStore>) -> Self {
        let registry = Arc::new(Registry::new(config.server.max_connections));
        let pool = Arc::new(WorkerPool::new(config.server.pool_config()));
        Self {
            config,
            registry,
            pool,
            policy,
        }
    }

    /// Bind every listener, then run until an OS shutdown signal arrives.
    /// Returns once shutdown has completed (gracefully or by force).
    pub async fn run(self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();

        let signal_listener = self.bind_signal_listener().await?;
        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
            pool: self.pool.clone(),
            limits: HubLimits {
                message_buffer_size: self.config.server.message_buffer_size,
                ..HubLimits::default()
            },
            envelope_pool: Arc::new(EnvelopePool::new(self.config.server.message_buffer_size.max(1) * 4)),
        });
        let router = hub::router(app_state);
        let signal_cancel = cancel.clone();
        let signal_task = tokio::spawn(async move {
            let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(err) = axum::serve(signal_listener, make_service)
                .with_graceful_shutdown(signal_cancel.cancelled_owned())
                .await
            {
                warn!(error = %err, "signaling listener exited with an error");
            }
        });

        let auth_addr: SocketAddr = self
            .config
            .server
            .auth_addr()
            .parse()
            .map_err(|e| ServerError::InvalidAddr(self.config.server.auth_addr(), e))?;
        let auth_server = Arc::new(AuthServer::new(self.policy.clone()));
        let auth_listener = auth_server
            .bind(auth_addr)
            .await
            .map_err(|source| anyhow::anyhow!("binding auth listener on {auth_addr}: {source}"))?;
        info!(%auth_addr, "auth collaborator listening");
        let auth_cancel = cancel.clone();
        let auth_task = tokio::spawn(async move { auth_server.run(auth_listener, auth_cancel).await });

        let nat_config = derive_nat_config(&self.config.server)?;
        let nat_server = Arc::new(NatProbeServer::bind(nat_config).await?);
        info!(primary = %nat_config.primary, "nat probe server listening");
        let nat_cancel = cancel.clone();
        let nat_task = tokio::spawn(async move { nat_server.run(nat_cancel).await });

        let reaper_task = tokio::spawn(run_reaper(
            self.registry.clone(),
            self.config.server.cleanup_interval_duration(),
            self.config.server.idle_timeout_duration(),
            cancel.clone(),
        ));

        info!("rdv-server is up");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, draining connections");
            }
        }
        cancel.cancel();

        let drain = async {
            let _ = tokio::join!(signal_task, auth_task, nat_task, reaper_task);
        };
        tokio::select! {
            _ = drain => info!("drained cleanly"),
            _ = tokio::time::sleep(DRAIN_DEADLINE) => warn!("drain deadline exceeded, forcing shutdown"),
            _ = tokio::signal::ctrl_c() => {
                warn!("second shutdown signal received, exiting immediately");
                std::process::exit(1);
            }
        }

        self.pool.release().await;
        info!("rdv-server stopped");
        Ok(())
    }

    async fn bind_signal_listener(&self) -> anyhow::Result<TcpListener> {
        let addr: SocketAddr = self
            .config
            .server
            .signal_addr()
            .parse()
            .map_err(|e| ServerError::InvalidAddr(self.config.server.signal_addr(), e))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                what: "signaling",
                addr,
                source,
            })?;
        info!(%addr, "signaling hub listening");
        Ok(listener)
    }
}

async fn run_reaper(registry: Arc<Registry>, interval: Duration, idle_horizon: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let reaped = registry.reap(Instant::now(), idle_horizon).await;
                if !reaped.is_empty() {
                    debug!(count = reaped.len(), "reaped idle connections");
                }
            }
        }
    }
}

fn derive_nat_config(listen: &ListenConfig) -> anyhow::Result<NatEndpointConfig> {
    let mk = |port: u16| -> anyhow::Result<SocketAddr> {
        let text = format!("{}:{}", listen.host, port);
        text.parse()
            .map_err(|e| ServerError::InvalidAddr(text.clone(), e).into())
    };
    Ok(NatEndpointConfig {
        primary: mk(listen.ice_port)?,
        primary_alt_port: mk(listen.ice_port.wrapping_add(1))?,
        alternate: mk(listen.ice_port.wrapping_add(2))?,
        alternate_alt_port: mk(listen.ice_port.wrapping_add(3))?,
    })
}
