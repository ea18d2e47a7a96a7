//! Caddy admin API client and route materialization
//!
//! Services are materialized into deterministic, id-addressed route
//! payloads; the client then creates, replaces, or deletes them over
//! the proxy's admin HTTP interface. The deterministic `revp_route_`
//! id is the sole mechanism for idempotent replace, and the only id
//! namespace the control plane will ever delete from.

pub mod client;
pub mod error;
pub mod routes;

pub use client::CaddyClient;
pub use error::{CaddyError, FailureKind, Result};
pub use routes::{materialize, payload_hash, route_id, Listener, RouteSpec, ROUTE_ID_PREFIX};
