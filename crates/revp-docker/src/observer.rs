//! Per-host observer state machine
//!
//! ```text
//!    Init ──connect──▶ Snapshot ──ok──▶ Streaming ──event──▶ Streaming
//!                         │                 │
//!                         └──fail──▶ Backoff ◀── stall/eof
//!                                      │
//!                                      └──▶ Init
//! ```

use crate::cli;
use crate::error::{DockerError, Result};
use rand::Rng;
use revp_ssh::{LineStream, RemoteExecutor};
use revp_types::{ConnectionState, ContainerRecord, HostEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Stream with no traffic for this long is considered stalled
    pub heartbeat_deadline: Duration,
    /// Authoritative snapshot cadence regardless of stream health
    pub resync_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_cap: Duration,
    pub snapshot_deadline: Duration,
    pub inspect_deadline: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            heartbeat_deadline: Duration::from_secs(90),
            resync_interval: Duration::from_secs(300),
            backoff_initial: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
            snapshot_deadline: Duration::from_secs(30),
            inspect_deadline: Duration::from_secs(10),
        }
    }
}

enum State {
    Init,
    Snapshot,
    Streaming(LineStream),
    Backoff(u32),
    /// Permanent failure; parked until configuration changes
    Halted,
}

enum StreamOutcome {
    Resync,
    Stalled,
    Ended,
    Cancelled,
}

/// Observes one Docker host and emits canonical container events
pub struct HostObserver {
    host: String,
    executor: Arc<dyn RemoteExecutor>,
    events: mpsc::Sender<HostEvent>,
    config: ObserverConfig,
    cancel: CancellationToken,
    next_resync: Instant,
    /// Consecutive connect failures; grows the backoff window
    failures: u32,
}

impl HostObserver {
    pub fn new(
        host: String,
        executor: Arc<dyn RemoteExecutor>,
        events: mpsc::Sender<HostEvent>,
        config: ObserverConfig,
        cancel: CancellationToken,
    ) -> Self {
        let next_resync = Instant::now() + config.resync_interval;
        Self {
            host,
            executor,
            events,
            config,
            cancel,
            next_resync,
            failures: 0,
        }
    }

    /// Drive the state machine until cancelled
    pub async fn run(mut self) {
        let mut state = State::Init;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            state = match state {
                State::Init => {
                    self.report(ConnectionState::Connecting).await;
                    State::Snapshot
                }
                State::Snapshot => match self.take_snapshot().await {
                    Ok(()) => {
                        self.report(ConnectionState::Connected).await;
                        match self.open_stream().await {
                            Ok(stream) => State::Streaming(stream),
                            Err(e) => self.failure_state(e).await,
                        }
                    }
                    Err(e) => self.failure_state(e).await,
                },
                State::Streaming(mut stream) => match self.consume_stream(&mut stream).await {
                    StreamOutcome::Resync => match self.take_snapshot().await {
                        Ok(()) => State::Streaming(stream),
                        Err(e) => {
                            stream.abort();
                            self.failure_state(e).await
                        }
                    },
                    StreamOutcome::Stalled => {
                        warn!(host = %self.host, "event stream stalled, reconnecting");
                        stream.abort();
                        self.report(ConnectionState::Disconnected("stream stalled".into()))
                            .await;
                        self.failures = 0;
                        State::Backoff(0)
                    }
                    StreamOutcome::Ended => {
                        self.report(ConnectionState::Disconnected("stream ended".into()))
                            .await;
                        self.failures = 0;
                        State::Backoff(0)
                    }
                    StreamOutcome::Cancelled => break,
                },
                State::Backoff(attempt) => {
                    let delay = jittered_backoff(
                        self.config.backoff_initial,
                        self.config.backoff_cap,
                        attempt,
                    );
                    debug!(host = %self.host, attempt, ?delay, "backing off before reconnect");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => State::Init,
                    }
                }
                State::Halted => {
                    self.cancel.cancelled().await;
                    break;
                }
            };
        }

        info!(host = %self.host, "observer stopped");
    }

    async fn failure_state(&mut self, error: DockerError) -> State {
        if error.is_transient() {
            warn!(host = %self.host, error = %error, "host connection lost");
            self.report(ConnectionState::Disconnected(error.to_string()))
                .await;
            let attempt = self.failures;
            self.failures = self.failures.saturating_add(1);
            State::Backoff(attempt)
        } else {
            warn!(host = %self.host, error = %error, "host failed permanently");
            self.report(ConnectionState::Failed(error.to_string())).await;
            State::Halted
        }
    }

    /// Full container listing; emits a `Sync` carrying the whole set
    async fn take_snapshot(&mut self) -> Result<()> {
        let containers = self.list_containers().await?;
        debug!(host = %self.host, count = containers.len(), "snapshot complete");
        self.failures = 0;
        self.next_resync = Instant::now() + self.config.resync_interval;
        self.send(HostEvent::Sync {
            host: self.host.clone(),
            containers,
        })
        .await
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let output = self
            .executor
            .run(
                &self.host,
                &cli::list_ids_argv(),
                self.config.snapshot_deadline,
            )
            .await?;
        if !output.success() {
            return Err(DockerError::CommandFailed {
                host: self.host.clone(),
                command: "ps".to_string(),
                stderr: output.stderr_str(),
            });
        }

        let ids: Vec<String> = output
            .stdout_str()
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let output = self
            .executor
            .run(
                &self.host,
                &cli::inspect_argv(&ids),
                self.config.snapshot_deadline,
            )
            .await?;
        // Inspect exits non-zero when a container vanished between the
        // listing and the inspect; the remaining lines are still valid

        let mut containers = Vec::new();
        for line in output.stdout_str().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match cli::parse_inspect_line(&self.host, line) {
                Ok(record) => containers.push(record),
                Err(e) => warn!(host = %self.host, error = %e, "skipping unparseable container"),
            }
        }
        Ok(containers)
    }

    async fn open_stream(&self) -> Result<LineStream> {
        Ok(self
            .executor
            .stream(&self.host, &cli::events_argv())
            .await?)
    }

    /// Pump the event stream until resync is due, the stream stalls or
    /// ends, or shutdown is requested
    async fn consume_stream(&mut self, stream: &mut LineStream) -> StreamOutcome {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                _ = tokio::time::sleep_until(self.next_resync) => return StreamOutcome::Resync,
                line = tokio::time::timeout(self.config.heartbeat_deadline, stream.next_line()) => {
                    match line {
                        Err(_) => return StreamOutcome::Stalled,
                        Ok(None) => return StreamOutcome::Ended,
                        Ok(Some(line)) => {
                            if self.handle_event_line(&line).await.is_err() {
                                return StreamOutcome::Cancelled;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_event_line(&self, line: &str) -> Result<()> {
        let event = match cli::parse_event_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()),
            Err(e) => {
                debug!(host = %self.host, error = %e, "ignoring unparseable event line");
                return Ok(());
            }
        };

        debug!(host = %self.host, id = %event.id, action = %event.action, "container event");

        if cli::is_removal_action(&event.action) {
            return self
                .send(HostEvent::Removed {
                    host: self.host.clone(),
                    id: event.id,
                })
                .await;
        }

        match self.inspect_container(&event.id).await {
            Ok(Some(record)) => self.send(HostEvent::Changed(record)).await,
            Ok(None) => {
                self.send(HostEvent::Removed {
                    host: self.host.clone(),
                    id: event.id,
                })
                .await
            }
            Err(e) => {
                // A failed targeted inspect is recoverable; the next
                // resync re-establishes the truth
                warn!(host = %self.host, id = %event.id, error = %e, "inspect after event failed");
                Ok(())
            }
        }
    }

    /// Targeted inspect; `None` when the container no longer exists
    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let argv = cli::inspect_argv(std::slice::from_ref(&id.to_string()));
        let output = self
            .executor
            .run(&self.host, &argv, self.config.inspect_deadline)
            .await?;

        if !output.success() {
            let stderr = output.stderr_str();
            if stderr.contains("No such object") || stderr.contains("No such container") {
                return Ok(None);
            }
            return Err(DockerError::CommandFailed {
                host: self.host.clone(),
                command: "inspect".to_string(),
                stderr,
            });
        }

        let stdout = output.stdout_str();
        let line = stdout.lines().find(|l| !l.trim().is_empty());
        match line {
            Some(line) => Ok(Some(cli::parse_inspect_line(&self.host, line)?)),
            None => Ok(None),
        }
    }

    async fn report(&self, state: ConnectionState) {
        let _ = self
            .events
            .send(HostEvent::Connection {
                host: self.host.clone(),
                state,
            })
            .await;
    }

    async fn send(&self, event: HostEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| DockerError::ChannelClosed)
    }
}

/// Exponential backoff with full jitter: 100 ms doubling to a 30 s cap
fn jittered_backoff(initial: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = initial.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let ceiling = exp.min(cap);
    let millis = ceiling.as_millis().max(1) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}
