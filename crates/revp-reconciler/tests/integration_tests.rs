use httpmock::prelude::*;
use httpmock::Mock;
use revp_caddy::{route_id, CaddyClient, Listener};
use revp_reconciler::{ApplyState, Reconciler, ReconcilerConfig, ReconcilerHandle};
use revp_registry::{RegistryHandle, ServiceRegistry};
use revp_routes::StaticRouteStore;
use revp_types::{
    Backend, BackendProtocol, DiffItem, Service, ServiceDiff, ServiceOptions, ServiceOrigin,
    StaticRecord,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn service(domain: &str) -> Service {
    Service {
        domain: domain.to_string(),
        origin: ServiceOrigin::Static {
            record_id: format!("static:{}", domain),
        },
        backend: Backend {
            host: "10.0.0.5".to_string(),
            port: 3000,
            protocol: BackendProtocol::Http,
            path: "/".to_string(),
        },
        options: ServiceOptions::default(),
    }
}

fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        reconcile_interval: Duration::from_secs(300),
        max_retries: 8,
        backoff_initial: Duration::from_millis(10),
        backoff_factor: 2,
        backoff_cap: Duration::from_millis(50),
        max_concurrent_reconciles: 4,
    }
}

struct Harness {
    diff_tx: mpsc::Sender<ServiceDiff>,
    handle: ReconcilerHandle,
    cancel: CancellationToken,
    store: Arc<StaticRouteStore>,
    _dir: tempfile::TempDir,
}

async fn harness(server: &MockServer, config: ReconcilerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        StaticRouteStore::open(dir.path().join("routes.yaml"))
            .await
            .unwrap(),
    );

    let (diff_tx, diff_rx) = mpsc::channel(64);
    let registry_handle = spawn_registry(store.clone(), diff_tx.clone()).await;

    let cancel = CancellationToken::new();
    let client = CaddyClient::new(&server.base_url(), Duration::from_secs(2)).unwrap();
    let (reconciler, handle) =
        Reconciler::new(client, registry_handle, config, cancel.clone());
    tokio::spawn(reconciler.run(diff_rx));

    Harness {
        diff_tx,
        handle,
        cancel,
        store,
        _dir: dir,
    }
}

async fn spawn_registry(
    store: Arc<StaticRouteStore>,
    diff_tx: mpsc::Sender<ServiceDiff>,
) -> RegistryHandle {
    let (host_tx, host_rx) = mpsc::channel(4);
    let store_events = store.subscribe();
    let (registry, handle) = ServiceRegistry::new(Vec::new(), store.clone(), diff_tx);
    let cancel = CancellationToken::new();
    tokio::spawn(async move {
        // Keep the sender alive so the registry never sees a closed input
        let _host_tx = host_tx;
        let _ = registry.run(host_rx, store_events, cancel).await;
    });
    handle
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_for_hits(what: &str, mock: &Mock<'_>, hits: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while mock.hits_async().await < hits {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn empty_config_mock(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/config/");
            then.status(200).json_body(json!({"apps": {}}));
        })
        .await;
}

fn applied(handle: &ReconcilerHandle, domain: &str) -> bool {
    handle
        .statuses()
        .get(domain)
        .map(|s| s.state == ApplyState::Applied)
        .unwrap_or(false)
}

#[tokio::test]
async fn added_service_puts_both_listener_routes() {
    let server = MockServer::start_async().await;
    empty_config_mock(&server).await;
    let s = service("app.example.com");
    let https = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("/id/{}", route_id("app.example.com", Listener::Https)));
            then.status(200);
        })
        .await;
    let http = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("/id/{}", route_id("app.example.com", Listener::Http)));
            then.status(200);
        })
        .await;

    let h = harness(&server, test_config()).await;
    h.diff_tx
        .send(ServiceDiff {
            items: vec![DiffItem::Added(s)],
        })
        .await
        .unwrap();

    wait_for("service applied", || applied(&h.handle, "app.example.com")).await;

    assert_eq!(https.hits_async().await, 1);
    assert_eq!(http.hits_async().await, 1);
    h.cancel.cancel();
}

#[tokio::test]
async fn removed_service_deletes_both_routes() {
    let server = MockServer::start_async().await;
    empty_config_mock(&server).await;
    let https = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!(
                "/id/{}",
                route_id("gone.example.com", Listener::Https)
            ));
            then.status(200);
        })
        .await;
    let http = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!(
                "/id/{}",
                route_id("gone.example.com", Listener::Http)
            ));
            // A route already missing counts as removed
            then.status(404);
        })
        .await;

    let h = harness(&server, test_config()).await;
    h.diff_tx
        .send(ServiceDiff {
            items: vec![DiffItem::Removed(service("gone.example.com"))],
        })
        .await
        .unwrap();

    wait_for("removal settled", || {
        !h.handle.statuses().contains_key("gone.example.com")
    })
    .await;

    assert_eq!(https.hits_async().await, 1);
    assert_eq!(http.hits_async().await, 1);
    h.cancel.cancel();
}

#[tokio::test]
async fn bad_payload_degrades_without_retry() {
    let server = MockServer::start_async().await;
    empty_config_mock(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path_contains("/id/");
            then.status(400).body("unknown handler");
        })
        .await;

    let h = harness(&server, test_config()).await;
    h.diff_tx
        .send(ServiceDiff {
            items: vec![DiffItem::Added(service("bad.example.com"))],
        })
        .await
        .unwrap();

    wait_for("service degraded", || {
        h.handle
            .degraded_domains()
            .contains(&"bad.example.com".to_string())
    })
    .await;

    // Permanent failures are not retried
    assert_eq!(put.hits_async().await, 1);
    assert!(h.handle.statuses()["bad.example.com"].state.is_degraded());
    h.cancel.cancel();
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let server = MockServer::start_async().await;
    empty_config_mock(&server).await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(PUT).path_contains("/id/");
            then.status(503);
        })
        .await;

    let h = harness(&server, test_config()).await;
    h.diff_tx
        .send(ServiceDiff {
            items: vec![DiffItem::Added(service("retry.example.com"))],
        })
        .await
        .unwrap();

    wait_for_hits("first retries", &failing, 2).await;

    // Proxy recovers
    failing.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(PUT).path_contains("/id/");
            then.status(200);
        })
        .await;

    wait_for("service applied after recovery", || {
        applied(&h.handle, "retry.example.com")
    })
    .await;
    h.cancel.cancel();
}

#[tokio::test]
async fn retries_are_capped_then_degraded() {
    let server = MockServer::start_async().await;
    empty_config_mock(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path_contains("/id/");
            then.status(503);
        })
        .await;

    let mut config = test_config();
    config.max_retries = 2;
    let h = harness(&server, config).await;
    h.diff_tx
        .send(ServiceDiff {
            items: vec![DiffItem::Added(service("down.example.com"))],
        })
        .await
        .unwrap();

    wait_for("service degraded after cap", || {
        h.handle
            .degraded_domains()
            .contains(&"down.example.com".to_string())
    })
    .await;

    // Initial attempt plus two retries
    assert_eq!(put.hits_async().await, 3);
    h.cancel.cancel();
}

#[tokio::test]
async fn sweep_collects_managed_orphans_only() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/config/");
            then.status(200).json_body(json!({
                "apps": { "http": { "servers": { "https": { "routes": [
                    { "@id": "revp_route_0000000000000000", "match": [{"host": ["stale.example.com"]}] },
                    { "@id": "operator_route", "match": [{"host": ["op.example.com"]}] }
                ]}}}}
            }));
        })
        .await;
    let orphan_delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/id/revp_route_0000000000000000");
            then.status(200);
        })
        .await;
    let operator_delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/id/operator_route");
            then.status(200);
        })
        .await;

    let h = harness(&server, test_config()).await;
    h.handle.trigger_sweep().await;

    wait_for_hits("orphan collected", &orphan_delete, 1).await;
    assert_eq!(operator_delete.hits_async().await, 0);
    h.cancel.cancel();
}

#[tokio::test]
async fn add_then_remove_settles_to_absent() {
    let server = MockServer::start_async().await;
    empty_config_mock(&server).await;
    server
        .mock_async(|when, then| {
            when.method(PUT).path_contains("/id/");
            then.status(200);
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path_contains("/id/");
            then.status(200);
        })
        .await;

    let h = harness(&server, test_config()).await;
    let s = service("flap.example.com");
    h.diff_tx
        .send(ServiceDiff {
            items: vec![DiffItem::Added(s.clone())],
        })
        .await
        .unwrap();
    h.diff_tx
        .send(ServiceDiff {
            items: vec![DiffItem::Removed(s)],
        })
        .await
        .unwrap();

    // Per-domain ordering: the delete always lands last
    wait_for_hits("both deletes", &delete, 2).await;
    wait_for("domain settled to absent", || {
        !h.handle.statuses().contains_key("flap.example.com")
    })
    .await;
    h.cancel.cancel();
}

#[tokio::test]
async fn static_record_converges_through_full_pipeline() {
    let server = MockServer::start_async().await;
    empty_config_mock(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path_contains("/id/");
            then.status(200);
        })
        .await;

    let h = harness(&server, test_config()).await;
    h.store
        .create(StaticRecord::new("pipe.example.com", "http://10.0.0.8:8000"))
        .await
        .unwrap();

    wait_for("pipeline applied", || applied(&h.handle, "pipe.example.com")).await;
    assert_eq!(put.hits_async().await, 2);
    h.cancel.cancel();
}
