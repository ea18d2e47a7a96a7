//! Registry writer task and reader handle

use crate::error::{RegistryError, Result};
use revp_labels::{compile_container, compile_static_records, CompileWarning};
use revp_routes::{StaticRouteStore, StoreEvent};
use revp_types::{
    ConnectionState, ContainerRecord, DiffItem, HostConfig, HostEvent, Service, ServiceDiff,
    StaticRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How many queued events are folded into one recompute
const COALESCE_LIMIT: usize = 256;

#[derive(Default)]
struct Shared {
    desired: RwLock<Arc<HashMap<String, Service>>>,
    host_states: RwLock<HashMap<String, ConnectionState>>,
    warnings: RwLock<Arc<Vec<CompileWarning>>>,
}

/// Read-side view of the registry; snapshots never block the writer
#[derive(Clone)]
pub struct RegistryHandle {
    shared: Arc<Shared>,
}

impl RegistryHandle {
    /// Current desired set keyed by domain
    pub fn desired(&self) -> Arc<HashMap<String, Service>> {
        self.shared.desired.read().expect("registry lock poisoned").clone()
    }

    /// Last observed connection state per host
    pub fn host_states(&self) -> HashMap<String, ConnectionState> {
        self.shared
            .host_states
            .read()
            .expect("registry lock poisoned")
            .clone()
    }

    /// Warnings from the most recent compilation
    pub fn warnings(&self) -> Arc<Vec<CompileWarning>> {
        self.shared.warnings.read().expect("registry lock poisoned").clone()
    }
}

/// Single-writer task owning the desired-service computation
pub struct ServiceRegistry {
    /// alias → declared host, for backend address resolution
    hosts: HashMap<String, HostConfig>,
    store: Arc<StaticRouteStore>,
    containers_by_host: HashMap<String, HashMap<String, ContainerRecord>>,
    static_records: Vec<StaticRecord>,
    desired: HashMap<String, Service>,
    diff_tx: mpsc::Sender<ServiceDiff>,
    shared: Arc<Shared>,
}

impl ServiceRegistry {
    pub fn new(
        hosts: Vec<HostConfig>,
        store: Arc<StaticRouteStore>,
        diff_tx: mpsc::Sender<ServiceDiff>,
    ) -> (Self, RegistryHandle) {
        let shared = Arc::new(Shared::default());
        let handle = RegistryHandle {
            shared: shared.clone(),
        };
        let registry = Self {
            hosts: hosts.into_iter().map(|h| (h.alias.clone(), h)).collect(),
            store,
            containers_by_host: HashMap::new(),
            static_records: Vec::new(),
            desired: HashMap::new(),
            diff_tx,
            shared,
        };
        (registry, handle)
    }

    /// Consume events until cancelled. Static records are loaded up
    /// front so statically declared services converge before the first
    /// host snapshot lands.
    pub async fn run(
        mut self,
        mut host_events: mpsc::Receiver<HostEvent>,
        mut store_events: broadcast::Receiver<StoreEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.static_records = self.store.list().await;
        self.recompute().await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = host_events.recv() => {
                    let Some(event) = event else { break };
                    self.apply_host_event(event);
                    // Fold bursts from churning hosts into one recompute
                    let mut folded = 0;
                    while folded < COALESCE_LIMIT {
                        match host_events.try_recv() {
                            Ok(event) => {
                                self.apply_host_event(event);
                                folded += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    self.recompute().await?;
                }
                event = store_events.recv() => {
                    match event {
                        Ok(StoreEvent::Changed) => {
                            self.static_records = self.store.list().await;
                            self.recompute().await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "store events lagged, reloading");
                            self.static_records = self.store.list().await;
                            self.recompute().await?;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        info!("service registry stopped");
        Ok(())
    }

    fn apply_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Sync { host, containers } => {
                debug!(host = %host, count = containers.len(), "host sync");
                let map = containers.into_iter().map(|c| (c.id.clone(), c)).collect();
                self.containers_by_host.insert(host, map);
            }
            HostEvent::Changed(record) => {
                self.containers_by_host
                    .entry(record.host.clone())
                    .or_default()
                    .insert(record.id.clone(), record);
            }
            HostEvent::Removed { host, id } => {
                if let Some(containers) = self.containers_by_host.get_mut(&host) {
                    containers.remove(&id);
                }
            }
            HostEvent::Connection { host, state } => {
                debug!(host = %host, state = %state, "host connection state");
                self.shared
                    .host_states
                    .write()
                    .expect("registry lock poisoned")
                    .insert(host, state);
            }
        }
    }

    /// Recompile everything, enforce domain uniqueness, publish the
    /// snapshot, and emit the diff
    async fn recompute(&mut self) -> Result<()> {
        let (candidate, warnings) = self.compile();

        let diff = diff_services(&self.desired, &candidate);
        for warning in &warnings {
            warn!(warning = %warning, "service dropped during compilation");
        }

        *self.shared.warnings.write().expect("registry lock poisoned") = Arc::new(warnings);
        *self.shared.desired.write().expect("registry lock poisoned") =
            Arc::new(candidate.clone());
        self.desired = candidate;

        if !diff.is_empty() {
            debug!(changes = diff.items.len(), "publishing service diff");
            self.diff_tx
                .send(diff)
                .await
                .map_err(|_| RegistryError::ChannelClosed)?;
        }
        Ok(())
    }

    /// Deterministic compilation order: static records first, then
    /// containers by (host alias, container id). First claim on a
    /// domain wins, so static beats container and lower aliases beat
    /// higher ones.
    fn compile(&self) -> (HashMap<String, Service>, Vec<CompileWarning>) {
        let mut services: HashMap<String, Service> = HashMap::new();
        let (static_services, mut warnings) = compile_static_records(&self.static_records);
        for service in static_services {
            claim(&mut services, service, &mut warnings);
        }

        let ordered_hosts: BTreeMap<&String, &HashMap<String, ContainerRecord>> =
            self.containers_by_host.iter().collect();
        for (alias, containers) in ordered_hosts {
            let Some(host) = self.hosts.get(alias) else {
                warn!(host = %alias, "events from undeclared host ignored");
                continue;
            };
            let ordered: BTreeMap<&String, &ContainerRecord> = containers.iter().collect();
            for record in ordered.into_values() {
                let (compiled, mut container_warnings) =
                    compile_container(record, &host.hostname);
                warnings.append(&mut container_warnings);
                for service in compiled {
                    claim(&mut services, service, &mut warnings);
                }
            }
        }

        (services, warnings)
    }
}

fn claim(
    services: &mut HashMap<String, Service>,
    service: Service,
    warnings: &mut Vec<CompileWarning>,
) {
    if let Some(winner) = services.get(&service.domain) {
        warnings.push(CompileWarning::DomainConflict {
            domain: service.domain.clone(),
            winner: origin_label(winner),
            loser: origin_label(&service),
        });
        return;
    }
    services.insert(service.domain.clone(), service);
}

fn origin_label(service: &Service) -> String {
    match &service.origin {
        revp_types::ServiceOrigin::Container {
            host, container_id, ..
        } => format!("container:{}/{}", host, container_id),
        revp_types::ServiceOrigin::Static { record_id } => record_id.clone(),
    }
}

/// Added / Updated (revision change) / Removed between two desired sets
fn diff_services(
    previous: &HashMap<String, Service>,
    next: &HashMap<String, Service>,
) -> ServiceDiff {
    let mut items = Vec::new();

    let mut domains: Vec<&String> = next.keys().collect();
    domains.sort();
    for domain in domains {
        let service = &next[domain];
        match previous.get(domain) {
            None => items.push(DiffItem::Added(service.clone())),
            Some(old) if old.revision() != service.revision() => {
                items.push(DiffItem::Updated(service.clone()))
            }
            Some(_) => {}
        }
    }

    let mut removed: Vec<&String> = previous
        .keys()
        .filter(|domain| !next.contains_key(*domain))
        .collect();
    removed.sort();
    for domain in removed {
        items.push(DiffItem::Removed(previous[domain].clone()));
    }

    ServiceDiff { items }
}
