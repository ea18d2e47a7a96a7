//! Typed wrapper over the proxy admin HTTP API

use crate::error::{CaddyError, Result};
use crate::routes::payload_hash;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Thin client over the proxy's id-addressed admin interface.
///
/// One connection pool per admin endpoint; every request is bounded by
/// the configured deadline.
#[derive(Clone)]
pub struct CaddyClient {
    base_url: String,
    http: reqwest::Client,
}

impl CaddyClient {
    pub fn new(base_url: &str, deadline: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(CaddyError::from)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Full configuration document
    pub async fn get_config(&self) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/config/", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CaddyError::Status {
                code: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// Every id-addressed route in the live configuration, with an
    /// order-independent payload hash for drift comparison
    pub async fn list_routes(&self) -> Result<Vec<(String, String)>> {
        let config = self.get_config().await?;
        let mut routes = Vec::new();
        collect_id_objects(&config, &mut routes);
        Ok(routes)
    }

    /// Create or replace the route at an id
    pub async fn put_route(&self, route_id: &str, payload: &Value) -> Result<()> {
        debug!(route_id, "put route");
        let response = self
            .http
            .put(format!("{}/id/{}", self.base_url, route_id))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CaddyError::Status {
                code: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Delete the route at an id; a missing route is success
    pub async fn delete_route(&self, route_id: &str) -> Result<()> {
        debug!(route_id, "delete route");
        let response = self
            .http
            .delete(format!("{}/id/{}", self.base_url, route_id))
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 404 || status.is_success() {
            return Ok(());
        }
        Err(CaddyError::Status {
            code: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

/// Walk the configuration tree collecting `(id, payload-hash)` for
/// every object carrying an `@id`
fn collect_id_objects(value: &Value, routes: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("@id") {
                routes.push((id.clone(), payload_hash(value)));
                // Route payloads do not nest other id-addressed routes
                return;
            }
            for child in map.values() {
                collect_id_objects(child, routes);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_id_objects(item, routes);
            }
        }
        _ => {}
    }
}
