//! Compiled routing intent and the diffs derived from it

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Protocol spoken toward the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendProtocol {
    #[default]
    Http,
    Https,
}

impl BackendProtocol {
    pub fn default_port(&self) -> u16 {
        match self {
            BackendProtocol::Http => 80,
            BackendProtocol::Https => 443,
        }
    }
}

impl std::fmt::Display for BackendProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendProtocol::Http => write!(f, "http"),
            BackendProtocol::Https => write!(f, "https"),
        }
    }
}

impl std::str::FromStr for BackendProtocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(BackendProtocol::Http),
            "https" => Ok(BackendProtocol::Https),
            other => Err(format!("invalid backend protocol: {}", other)),
        }
    }
}

/// Upstream endpoint receiving proxied traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub host: String,
    pub port: u16,
    pub protocol: BackendProtocol,
    pub path: String,
}

impl Backend {
    /// The `host:port` dial string handed to the proxy
    pub fn dial(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Closed set of per-service routing options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Issue an HTTP-to-HTTPS redirect route alongside the HTTPS route
    pub force_ssl: bool,
    /// Preserve Upgrade/Connection headers end to end
    pub support_websocket: bool,
    /// Proxy accepts any backend certificate
    pub tls_insecure_skip_verify: bool,
    /// Rewrite client-IP headers from CF-Connecting-IP, serve the same
    /// route on the HTTP listener, and suppress the redirect route
    pub cloudflare_tunnel: bool,
    /// Auxiliary domain materialized as a second tunneled service
    pub tunnel_domain: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            force_ssl: true,
            support_websocket: false,
            tls_insecure_skip_verify: false,
            cloudflare_tunnel: false,
            tunnel_domain: None,
        }
    }
}

/// Where a service was compiled from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ServiceOrigin {
    Container {
        host: String,
        container_id: String,
        container_port: u16,
    },
    Static {
        record_id: String,
    },
}

impl ServiceOrigin {
    pub fn is_static(&self) -> bool {
        matches!(self, ServiceOrigin::Static { .. })
    }
}

/// A compiled, validated routing intent keyed by domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub domain: String,
    pub origin: ServiceOrigin,
    pub backend: Backend,
    pub options: ServiceOptions,
}

impl Service {
    /// Content hash over everything that affects the materialized routes.
    ///
    /// The origin is deliberately excluded: a container restarting under
    /// a new id with an unchanged backend must not trigger an update.
    pub fn revision(&self) -> String {
        #[derive(Serialize)]
        struct Content<'a> {
            domain: &'a str,
            backend: &'a Backend,
            options: &'a ServiceOptions,
        }

        let content = Content {
            domain: &self.domain,
            backend: &self.backend,
            options: &self.options,
        };
        let encoded = serde_json::to_vec(&content).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        hex::encode(digest)
    }
}

/// One item of a registry diff
#[derive(Debug, Clone)]
pub enum DiffItem {
    Added(Service),
    /// Carries the new shape; the route ids are stable so the old shape
    /// is not needed for an update
    Updated(Service),
    /// Carries the last-known shape so the reconciler can derive every
    /// route id that must be deleted
    Removed(Service),
}

impl DiffItem {
    pub fn domain(&self) -> &str {
        match self {
            DiffItem::Added(s) | DiffItem::Updated(s) | DiffItem::Removed(s) => &s.domain,
        }
    }
}

/// Ordered batch of changes from one registry recompute
#[derive(Debug, Clone, Default)]
pub struct ServiceDiff {
    pub items: Vec<DiffItem>,
}

impl ServiceDiff {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
