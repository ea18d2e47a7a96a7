//! Minimal health and status endpoint
//!
//! Exposes `/healthz` for liveness probes and `/status` with the
//! operator-facing inventory: host connection states, desired service
//! counts, degraded domains, compile warnings, and store health. The
//! full dashboard lives outside this process.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use revp_reconciler::{DomainStatus, ReconcilerHandle};
use revp_registry::RegistryHandle;
use revp_routes::{StaticRouteStore, StoreInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct HealthState {
    pub registry: RegistryHandle,
    pub reconciler: ReconcilerHandle,
    pub store: Arc<StaticRouteStore>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
    uptime_secs: i64,
}

#[derive(Serialize)]
struct StatusReport {
    hosts: HashMap<String, revp_types::ConnectionState>,
    desired_services: usize,
    routes: HashMap<String, DomainStatus>,
    degraded: Vec<String>,
    warnings: Vec<String>,
    store: StoreInfo,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .with_state(state)
}

async fn healthz(State(state): State<HealthState>) -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

async fn status(State(state): State<HealthState>) -> Json<StatusReport> {
    Json(StatusReport {
        hosts: state.registry.host_states(),
        desired_services: state.registry.desired().len(),
        routes: state.reconciler.statuses(),
        degraded: state.reconciler.degraded_domains(),
        warnings: state
            .registry
            .warnings()
            .iter()
            .map(|w| w.to_string())
            .collect(),
        store: state.store.info().await,
    })
}
