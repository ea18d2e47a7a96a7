//! The convergence engine

use crate::status::{ApplyState, DomainStatus};
use dashmap::DashMap;
use rand::Rng;
use revp_caddy::{materialize, route_id, CaddyClient, FailureKind, Listener, ROUTE_ID_PREFIX};
use revp_registry::RegistryHandle;
use revp_types::{DiffItem, Service, ServiceDiff};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Full sweep cadence; also the bound on orphan lifetime
    pub reconcile_interval: Duration,
    pub max_retries: u32,
    pub backoff_initial: Duration,
    /// Multiplier between consecutive retry delays
    pub backoff_factor: u32,
    pub backoff_cap: Duration,
    pub max_concurrent_reconciles: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(300),
            max_retries: 8,
            backoff_initial: Duration::from_millis(100),
            backoff_factor: 4,
            backoff_cap: Duration::from_secs(30),
            max_concurrent_reconciles: 16,
        }
    }
}

/// Per-domain intent; the generation counter detects stale work
#[derive(Default)]
struct Intent {
    /// Desired shape; `None` means the domain's routes must go
    service: Option<Service>,
    generation: u64,
    applied: u64,
    in_flight: bool,
    /// Intent changed while a worker was busy; re-run on completion
    dirty: bool,
}

struct Inner {
    client: CaddyClient,
    registry: RegistryHandle,
    config: ReconcilerConfig,
    intents: Mutex<HashMap<String, Intent>>,
    status: DashMap<String, DomainStatus>,
    workers: Semaphore,
    cancel: CancellationToken,
}

/// External control and status view
#[derive(Clone)]
pub struct ReconcilerHandle {
    inner: Arc<Inner>,
    sweep_tx: mpsc::Sender<()>,
}

impl ReconcilerHandle {
    /// Snapshot of per-domain apply states
    pub fn statuses(&self) -> HashMap<String, DomainStatus> {
        self.inner
            .status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn degraded_domains(&self) -> Vec<String> {
        self.inner
            .status
            .iter()
            .filter(|entry| entry.value().state.is_degraded())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Ask for a full sweep outside the regular cadence
    pub async fn trigger_sweep(&self) {
        let _ = self.sweep_tx.send(()).await;
    }
}

/// Diff-driven reconciliation with periodic drift repair
pub struct Reconciler {
    inner: Arc<Inner>,
    sweep_rx: mpsc::Receiver<()>,
}

impl Reconciler {
    pub fn new(
        client: CaddyClient,
        registry: RegistryHandle,
        config: ReconcilerConfig,
        cancel: CancellationToken,
    ) -> (Self, ReconcilerHandle) {
        let (sweep_tx, sweep_rx) = mpsc::channel(4);
        let inner = Arc::new(Inner {
            workers: Semaphore::new(config.max_concurrent_reconciles),
            client,
            registry,
            config,
            intents: Mutex::new(HashMap::new()),
            status: DashMap::new(),
            cancel,
        });
        let handle = ReconcilerHandle {
            inner: inner.clone(),
            sweep_tx,
        };
        (Self { inner, sweep_rx }, handle)
    }

    /// Consume registry diffs and run sweeps until cancelled.
    ///
    /// The first sweep fires immediately, which makes a cold start
    /// equivalent to steady state: snapshot, compare, converge.
    pub async fn run(mut self, mut diffs: mpsc::Receiver<ServiceDiff>) {
        let mut ticker = tokio::time::interval(self.inner.config.reconcile_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                diff = diffs.recv() => {
                    match diff {
                        Some(diff) => self.inner.clone().ingest(diff),
                        None => break,
                    }
                }
                _ = ticker.tick() => self.inner.clone().sweep().await,
                Some(()) = self.sweep_rx.recv() => self.inner.clone().sweep().await,
            }
        }

        info!("reconciler stopped");
    }
}

enum Outcome {
    Applied,
    Degraded(String),
    /// The intent advanced mid-work; the worker loop re-reads it
    Stale,
    Cancelled,
}

impl Inner {
    /// Fold a diff into the intents map and schedule the domains
    fn ingest(self: Arc<Self>, diff: ServiceDiff) {
        for item in diff.items {
            let domain = item.domain().to_string();
            let service = match item {
                DiffItem::Added(s) | DiffItem::Updated(s) => Some(s),
                DiffItem::Removed(_) => None,
            };

            let mut intents = self.intents.lock().expect("intents lock poisoned");
            let intent = intents.entry(domain.clone()).or_default();
            intent.generation += 1;
            self.status.insert(
                domain.clone(),
                DomainStatus {
                    state: ApplyState::Pending,
                    revision: service.as_ref().map(|s| s.revision()),
                },
            );
            intent.service = service;
            Self::schedule_locked(&self, intent, &domain);
        }
    }

    /// Must hold the intents lock. At most one worker per domain; a
    /// busy domain is flagged dirty and re-run by its current worker.
    fn schedule_locked(self: &Arc<Self>, intent: &mut Intent, domain: &str) {
        if intent.in_flight {
            intent.dirty = true;
            return;
        }
        intent.in_flight = true;
        let this = self.clone();
        let domain = domain.to_string();
        tokio::spawn(async move { this.worker(domain).await });
    }

    async fn worker(self: Arc<Self>, domain: String) {
        let Ok(_permit) = self.workers.acquire().await else {
            return;
        };

        loop {
            let (service, generation) = {
                let intents = self.intents.lock().expect("intents lock poisoned");
                let Some(intent) = intents.get(&domain) else {
                    return;
                };
                (intent.service.clone(), intent.generation)
            };

            let outcome = self.converge(&domain, service.as_ref(), generation).await;

            let mut intents = self.intents.lock().expect("intents lock poisoned");
            let Some(intent) = intents.get_mut(&domain) else {
                return;
            };

            match outcome {
                Outcome::Applied if intent.generation == generation => {
                    intent.applied = generation;
                    self.status.insert(
                        domain.clone(),
                        DomainStatus {
                            state: ApplyState::Applied,
                            revision: service.as_ref().map(|s| s.revision()),
                        },
                    );
                }
                Outcome::Degraded(reason) if intent.generation == generation => {
                    warn!(domain = %domain, reason = %reason, "service degraded");
                    self.status.insert(
                        domain.clone(),
                        DomainStatus {
                            state: ApplyState::Degraded(reason),
                            revision: service.as_ref().map(|s| s.revision()),
                        },
                    );
                }
                Outcome::Cancelled => {
                    intent.in_flight = false;
                    return;
                }
                _ => {}
            }

            if intent.dirty || intent.generation != generation {
                intent.dirty = false;
                continue;
            }

            intent.in_flight = false;
            // A fully applied removal has nothing left to track
            if intent.service.is_none() && intent.applied == intent.generation {
                intents.remove(&domain);
                self.status.remove(&domain);
            }
            return;
        }
    }

    /// One apply or removal with bounded, jittered retries
    async fn converge(
        &self,
        domain: &str,
        service: Option<&Service>,
        generation: u64,
    ) -> Outcome {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let result = match service {
                Some(service) => self.apply(service).await,
                None => self.remove(domain).await,
            };

            let error = match result {
                Ok(()) => {
                    debug!(domain, generation, "converged");
                    return Outcome::Applied;
                }
                Err(e) => e,
            };

            match error.kind() {
                FailureKind::Transient => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Outcome::Degraded(format!(
                            "gave up after {} attempts: {}",
                            attempt - 1,
                            error
                        ));
                    }
                    let delay = self.retry_delay(attempt);
                    debug!(domain, attempt, ?delay, error = %error, "retrying after transient failure");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Outcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if self.generation_of(domain) != Some(generation) {
                        return Outcome::Stale;
                    }
                }
                // Conflict repair already ran inside apply
                FailureKind::Permanent | FailureKind::Conflict => {
                    return Outcome::Degraded(error.to_string());
                }
            }
        }
    }

    /// PUT every materialized route; a conflicting id is repaired once
    /// by deleting the offender and re-applying
    async fn apply(&self, service: &Service) -> revp_caddy::Result<()> {
        for route in materialize(service) {
            match self.client.put_route(&route.id, &route.payload).await {
                Ok(()) => {}
                Err(e) if e.kind() == FailureKind::Conflict => {
                    warn!(route_id = %route.id, "route conflict, repairing");
                    self.client.delete_route(&route.id).await?;
                    self.client.put_route(&route.id, &route.payload).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Delete both listener routes; missing routes are success
    async fn remove(&self, domain: &str) -> revp_caddy::Result<()> {
        for listener in [Listener::Https, Listener::Http] {
            self.client
                .delete_route(&route_id(domain, listener))
                .await?;
        }
        Ok(())
    }

    fn generation_of(&self, domain: &str) -> Option<u64> {
        self.intents
            .lock()
            .expect("intents lock poisoned")
            .get(domain)
            .map(|i| i.generation)
    }

    /// 100 ms, 400 ms, 1.6 s, 6.4 s, capped at 30 s, full jitter
    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = self.config.backoff_factor.max(2);
        let exp = self
            .config
            .backoff_initial
            .saturating_mul(factor.saturating_pow(attempt.saturating_sub(1).min(10)));
        let ceiling = exp.min(self.config.backoff_cap);
        let millis = ceiling.as_millis().max(1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    /// Full comparison of desired and live: collect orphans inside the
    /// managed id namespace, re-enqueue missing or stale domains
    async fn sweep(self: Arc<Self>) {
        let live = match self.client.list_routes().await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "sweep skipped, proxy unreachable");
                return;
            }
        };
        let desired = self.registry.desired();

        let mut expected: HashMap<String, String> = HashMap::new();
        let mut domain_of_id: HashMap<String, String> = HashMap::new();
        for (domain, service) in desired.iter() {
            for route in materialize(service) {
                expected.insert(route.id.clone(), route.payload_hash());
                domain_of_id.insert(route.id, domain.clone());
            }
        }

        let mut orphans = 0usize;
        for (id, _) in &live {
            // Ids outside the managed namespace belong to the operator
            if id.starts_with(ROUTE_ID_PREFIX) && !expected.contains_key(id) {
                match self.client.delete_route(id).await {
                    Ok(()) => orphans += 1,
                    Err(e) => warn!(route_id = %id, error = %e, "orphan delete failed"),
                }
            }
        }

        let live_hashes: HashMap<String, String> = live.into_iter().collect();
        let mut stale: HashSet<&String> = HashSet::new();
        for (id, hash) in &expected {
            if live_hashes.get(id) != Some(hash) {
                stale.insert(&domain_of_id[id]);
            }
        }

        if orphans > 0 || !stale.is_empty() {
            info!(orphans, stale = stale.len(), "sweep found drift");
        }

        let mut intents = self.intents.lock().expect("intents lock poisoned");
        for domain in stale {
            let intent = intents.entry(domain.clone()).or_default();
            intent.generation += 1;
            // Seed from the snapshot so a cold start converges too
            intent.service = desired.get(domain).cloned();
            self.status.entry(domain.clone()).or_insert(DomainStatus {
                state: ApplyState::Pending,
                revision: intent.service.as_ref().map(|s| s.revision()),
            });
            Self::schedule_locked(&self, intent, domain);
        }
    }
}
