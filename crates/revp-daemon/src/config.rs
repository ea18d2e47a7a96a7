//! Daemon configuration file

use crate::error::{DaemonError, Result};
use revp_types::{check_unique_aliases, HostConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hosts to observe; disabled entries are kept for visibility but
    /// get no observer
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    pub proxy: ProxyConfig,
    /// YAML file carrying the `static_routes` list
    pub static_routes_file: PathBuf,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,
    /// Address for /healthz and /status; absent disables the endpoint
    #[serde(default)]
    pub health_listen: Option<SocketAddr>,
    /// Directory for SSH control sockets
    #[serde(default)]
    pub ssh_control_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Base URL of the proxy admin API
    pub admin_url: String,
    #[serde(default = "default_proxy_deadline_secs")]
    pub request_deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_heartbeat_deadline_secs")]
    pub heartbeat_deadline_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_store_poll_secs")]
    pub store_poll_interval_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            heartbeat_deadline_secs: default_heartbeat_deadline_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            store_poll_interval_secs: default_store_poll_secs(),
        }
    }
}

fn default_max_concurrent() -> usize {
    16
}

fn default_proxy_deadline_secs() -> u64 {
    5
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_heartbeat_deadline_secs() -> u64 {
    90
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_store_poll_secs() -> u64 {
    2
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_unique_aliases(&self.hosts)
            .map_err(|e| DaemonError::Configuration(e.to_string()))?;
        for host in &self.hosts {
            host.validate()
                .map_err(|e| DaemonError::Configuration(e.to_string()))?;
        }

        if self.proxy.admin_url.is_empty() {
            return Err(DaemonError::Configuration(
                "proxy.admin_url is required".to_string(),
            ));
        }
        if !self.proxy.admin_url.starts_with("http://")
            && !self.proxy.admin_url.starts_with("https://")
        {
            return Err(DaemonError::Configuration(format!(
                "proxy.admin_url must be an http(s) URL: {}",
                self.proxy.admin_url
            )));
        }

        if self.max_concurrent_reconciles == 0 {
            return Err(DaemonError::Configuration(
                "max_concurrent_reconciles must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn enabled_hosts(&self) -> Vec<HostConfig> {
        self.hosts.iter().filter(|h| h.enabled).cloned().collect()
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.timers.reconcile_interval_secs)
    }

    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_secs(self.timers.heartbeat_deadline_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.timers.shutdown_grace_secs)
    }

    pub fn store_poll_interval(&self) -> Duration {
        Duration::from_secs(self.timers.store_poll_interval_secs)
    }

    pub fn proxy_deadline(&self) -> Duration {
        Duration::from_secs(self.proxy.request_deadline_secs)
    }
}
