//! Canonical container model reported by host observers

use crate::host::ConnectionState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container lifecycle state as reported by the remote Docker engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Paused,
    Exited,
    Other(String),
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

impl From<&str> for ContainerStatus {
    fn from(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "exited" | "dead" => ContainerStatus::Exited,
            other => ContainerStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Other(status) => write!(f, "{}", status),
        }
    }
}

/// Snapshot of one container on one host.
///
/// `ports` maps a container port to the host port it is published on,
/// or `None` when the port is exposed but not published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    /// Alias of the owning host
    pub host: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
    pub ports: HashMap<u16, Option<u16>>,
}

impl ContainerRecord {
    /// Published host port for a container port, if any
    pub fn published_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied().flatten()
    }
}

/// Events emitted by a host observer toward the service registry
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// Authoritative full set of containers on a host, replacing any
    /// previous view of that host
    Sync {
        host: String,
        containers: Vec<ContainerRecord>,
    },
    /// A single container appeared or changed
    Changed(ContainerRecord),
    /// A container is gone from the host
    Removed { host: String, id: String },
    /// Observer connection health transition, for the status surface
    Connection {
        host: String,
        state: ConnectionState,
    },
}
