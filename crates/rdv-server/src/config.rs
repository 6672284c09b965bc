//! Structured configuration: loads a TOML file if present, falling back to
//! built-in defaults otherwise. The lookup path is overridden by the
//! `RDV_CONFIG` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rdv_pool::PoolConfig;

/// Top-level configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,
    #[serde(default = "default_signal_port")]
    pub signal_port: u16,
    #[serde(default = "default_ice_port")]
    pub ice_port: u16,
    /// 0 = unbounded.
    #[serde(default)]
    pub max_connections: usize,
    /// Seconds of inactivity before a record is reap-eligible.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_pool_size")]
    pub goroutine_pool_size: usize,
    #[serde(default = "default_message_buffer_size")]
    pub message_buffer_size: usize,
    /// Seconds between reaper ticks.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Seconds an idle pool worker is expired after.
    #[serde(default = "default_expiry_duration")]
    pub expiry_duration: u64,
    #[serde(default = "default_max_blocking_tasks")]
    pub max_blocking_tasks: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_auth_port() -> u16 {
    9000
}
fn default_signal_port() -> u16 {
    9001
}
fn default_ice_port() -> u16 {
    9002
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_pool_size() -> usize {
    64
}
fn default_message_buffer_size() -> usize {
    64
}
fn default_cleanup_interval() -> u64 {
    30
}
fn default_expiry_duration() -> u64 {
    60
}
fn default_max_blocking_tasks() -> usize {
    128
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            auth_port: default_auth_port(),
            signal_port: default_signal_port(),
            ice_port: default_ice_port(),
            max_connections: 0,
            idle_timeout: default_idle_timeout(),
            goroutine_pool_size: default_pool_size(),
            message_buffer_size: default_message_buffer_size(),
            cleanup_interval: default_cleanup_interval(),
            expiry_duration: default_expiry_duration(),
            max_blocking_tasks: default_max_blocking_tasks(),
        }
    }
}

/// Gates log verbosity defaults and structured-vs-pretty `tracing`
/// formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ListenConfig::default(),
            environment: Environment::default(),
        }
    }
}

impl ListenConfig {
    pub fn signal_addr(&self) -> String {
        format!("{}:{}", self.host, self.signal_port)
    }

    pub fn auth_addr(&self) -> String {
        format!("{}:{}", self.host, self.auth_port)
    }

    pub fn ice_addr(&self) -> String {
        format!("{}:{}", self.host, self.ice_port)
    }

    pub fn idle_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn cleanup_interval_duration(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.goroutine_pool_size,
            idle_expiry: Duration::from_secs(self.expiry_duration),
            max_blocking: self.max_blocking_tasks,
            pre_alloc: false,
        }
    }
}

impl ServerConfig {
    /// Load from the path named by `RDV_CONFIG`, or the platform-default
    /// location, falling back to [`ServerConfig::default`] if no file is
    /// present. A present-but-malformed file is an error (fatal
    /// initialization failure per §6.5, exit code 1).
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("RDV_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("rdv-server.toml")
    }
}
