//! Host declarations and connection state

use crate::error::{CommonError, Result};
use crate::validation::{HostnameValidator, PortValidator};
use serde::{Deserialize, Serialize};

/// A remote Docker host reachable over SSH.
///
/// Hosts are declared in the daemon configuration; one observer task is
/// started per enabled host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Unique short name used in logs, service origins, and control paths
    pub alias: String,
    /// Hostname or IP address the SSH session dials
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    /// Path to the private key handed to the SSH client
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_enabled() -> bool {
    true
}

impl HostConfig {
    /// Validate alias, hostname, user, and port against the allowlists.
    ///
    /// Everything that later reaches the remote executor as an argv part
    /// must pass through here first.
    pub fn validate(&self) -> Result<()> {
        HostnameValidator::validate(&self.alias)?;
        HostnameValidator::validate(&self.hostname)?;
        HostnameValidator::validate(&self.user)?;
        PortValidator::validate(self.port)?;
        Ok(())
    }

    /// The `user@hostname` destination handed to the SSH client
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.hostname)
    }
}

/// Connection health of a host as seen by its observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "reason")]
pub enum ConnectionState {
    Unknown,
    Connecting,
    Connected,
    Disconnected(String),
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Permanent failures are not retried until configuration changes
    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Unknown => write!(f, "unknown"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            ConnectionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Reject configurations where two hosts share an alias
pub fn check_unique_aliases(hosts: &[HostConfig]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for host in hosts {
        if !seen.insert(host.alias.as_str()) {
            return Err(CommonError::Configuration(format!(
                "Duplicate host alias: {}",
                host.alias
            )));
        }
    }
    Ok(())
}
