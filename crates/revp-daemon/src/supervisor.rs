//! Task wiring and lifecycle

use crate::config::AppConfig;
use crate::error::Result;
use crate::health::{self, HealthState};
use revp_caddy::CaddyClient;
use revp_docker::{HostObserver, ObserverConfig};
use revp_reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle};
use revp_registry::{RegistryHandle, ServiceRegistry};
use revp_routes::{watch_store, StaticRouteStore};
use revp_ssh::{RemoteExecutor, SshExecutor, SshExecutorConfig};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Channel depth between observers, registry, and reconciler
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Owns every control-plane task and drives graceful shutdown
pub struct Supervisor {
    config: AppConfig,
    root: CancellationToken,
}

impl Supervisor {
    pub fn new(config: AppConfig, root: CancellationToken) -> Self {
        Self { config, root }
    }

    /// Start every component and block until the root token cancels,
    /// then drain tasks within the shutdown grace
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let mut tasks = JoinSet::new();

        let store = Arc::new(StaticRouteStore::open(&config.static_routes_file).await?);

        let (host_tx, host_rx) = tokio::sync::mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (diff_tx, diff_rx) = tokio::sync::mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let (registry, registry_handle) =
            ServiceRegistry::new(config.hosts.clone(), store.clone(), diff_tx);
        let store_events = store.subscribe();
        let registry_cancel = self.root.child_token();
        tasks.spawn(async move {
            if let Err(e) = registry.run(host_rx, store_events, registry_cancel).await {
                warn!(error = %e, "registry task ended with error");
            }
        });

        let client = CaddyClient::new(&config.proxy.admin_url, config.proxy_deadline())?;
        let (reconciler, reconciler_handle) = Reconciler::new(
            client,
            registry_handle.clone(),
            ReconcilerConfig {
                reconcile_interval: config.reconcile_interval(),
                max_concurrent_reconciles: config.max_concurrent_reconciles,
                ..ReconcilerConfig::default()
            },
            self.root.child_token(),
        );
        tasks.spawn(reconciler.run(diff_rx));

        self.spawn_observers(&mut tasks, host_tx)?;

        let watcher_cancel = self.root.child_token();
        let watcher_store = store.clone();
        let poll = config.store_poll_interval();
        tasks.spawn(watch_store(watcher_store, poll, watcher_cancel));

        self.spawn_health(&mut tasks, registry_handle, reconciler_handle, store.clone())
            .await?;

        info!(
            hosts = config.enabled_hosts().len(),
            proxy = %config.proxy.admin_url,
            "control plane running"
        );

        self.root.cancelled().await;
        self.drain(tasks).await;
        Ok(())
    }

    fn spawn_observers(
        &self,
        tasks: &mut JoinSet<()>,
        host_tx: tokio::sync::mpsc::Sender<revp_types::HostEvent>,
    ) -> Result<()> {
        let enabled = self.config.enabled_hosts();
        if enabled.is_empty() {
            info!("no enabled hosts; running on static routes only");
            return Ok(());
        }

        let mut ssh_config = SshExecutorConfig::default();
        if let Some(dir) = &self.config.ssh_control_dir {
            ssh_config.control_dir = dir.clone();
        }
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(SshExecutor::new(enabled.clone(), ssh_config)?);

        let observer_config = ObserverConfig {
            heartbeat_deadline: self.config.heartbeat_deadline(),
            resync_interval: self.config.reconcile_interval(),
            ..ObserverConfig::default()
        };

        for host in enabled {
            let observer = HostObserver::new(
                host.alias.clone(),
                executor.clone(),
                host_tx.clone(),
                observer_config.clone(),
                self.root.child_token(),
            );
            tasks.spawn(observer.run());
        }
        Ok(())
    }

    async fn spawn_health(
        &self,
        tasks: &mut JoinSet<()>,
        registry: RegistryHandle,
        reconciler: ReconcilerHandle,
        store: Arc<StaticRouteStore>,
    ) -> Result<()> {
        let Some(listen) = self.config.health_listen else {
            return Ok(());
        };

        let state = HealthState {
            registry,
            reconciler,
            store,
            started_at: chrono::Utc::now(),
        };
        let listener = tokio::net::TcpListener::bind(listen).await?;
        let cancel = self.root.child_token();
        info!(listen = %listen, "health endpoint listening");

        tasks.spawn(async move {
            let result = axum::serve(listener, health::router(state))
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "health endpoint ended with error");
            }
        });
        Ok(())
    }

    /// In-flight work may finish; anything slower than the grace is
    /// abandoned
    async fn drain(&self, mut tasks: JoinSet<()>) {
        info!("shutting down, draining tasks");
        let grace = self.config.shutdown_grace();
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    if joined.is_none() {
                        info!("all tasks drained");
                        return;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(remaining = tasks.len(), "shutdown grace elapsed, aborting tasks");
                    tasks.abort_all();
                    return;
                }
            }
        }
    }
}
