//! Static route records as persisted in the route file

use serde::{Deserialize, Serialize};

/// One element of the `static_routes` list in the route file.
///
/// Optional fields default at compile time, not at parse time, so the
/// file round-trips without gaining keys the operator never wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRecord {
    pub domain: String,
    pub backend_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_ssl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_websocket: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_insecure_skip_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudflare_tunnel: Option<bool>,
}

impl StaticRecord {
    pub fn new(domain: &str, backend_url: &str) -> Self {
        Self {
            domain: domain.to_string(),
            backend_url: backend_url.to_string(),
            backend_path: None,
            force_ssl: None,
            support_websocket: None,
            tls_insecure_skip_verify: None,
            cloudflare_tunnel: None,
        }
    }

    /// Stable identifier used as the service origin
    pub fn record_id(&self) -> String {
        format!("static:{}", self.domain)
    }
}

/// Top-level document shape of the static route file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRouteFile {
    #[serde(default)]
    pub static_routes: Vec<StaticRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_round_trip() {
        let yaml = "static_routes:\n- domain: app.example.com\n  backend_url: http://10.0.0.5:3000\n";
        let file: StaticRouteFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.static_routes.len(), 1);
        assert_eq!(file.static_routes[0].domain, "app.example.com");
        assert_eq!(file.static_routes[0].force_ssl, None);

        let out = serde_yaml::to_string(&file).unwrap();
        assert!(!out.contains("force_ssl"));
    }

    #[test]
    fn test_empty_document() {
        let file: StaticRouteFile = serde_yaml::from_str("static_routes: []").unwrap();
        assert!(file.static_routes.is_empty());
    }
}
