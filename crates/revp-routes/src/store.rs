//! Thread-safe CRUD over the static route file

use crate::error::{Result, StoreError};
use revp_labels::compile_static_record;
use revp_types::{StaticRecord, StaticRouteFile};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Emitted after every successful mutation or detected external edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Changed,
}

/// Store health for the status surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreInfo {
    pub path: PathBuf,
    pub record_count: usize,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<StaticRecord>,
    last_error: Option<String>,
    /// (mtime, size) of the file contents this state was loaded from
    file_stamp: Option<(SystemTime, u64)>,
}

/// File-backed static route store.
///
/// Mutations are serialized through `write_lock`; the in-memory state
/// changes only after the file write succeeded, so memory and disk
/// cannot drift apart on I/O failure.
pub struct StaticRouteStore {
    path: PathBuf,
    state: RwLock<StoreState>,
    write_lock: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
}

impl StaticRouteStore {
    /// Open the store, loading the file if it exists.
    ///
    /// A missing file is an empty store; it is created on first write.
    /// An unparseable file aborts startup rather than silently serving
    /// an empty set.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut state = StoreState::default();
        if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let file: StaticRouteFile = serde_yaml::from_str(&content)?;
            state.records = dedupe(file.static_routes);
            state.file_stamp = file_stamp(&path);
        }
        info!(path = %path.display(), records = state.records.len(), "static route store opened");

        Ok(Self {
            path,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub async fn list(&self) -> Vec<StaticRecord> {
        self.state.read().await.records.clone()
    }

    pub async fn get(&self, domain: &str) -> Option<StaticRecord> {
        self.state
            .read()
            .await
            .records
            .iter()
            .find(|r| r.domain == domain)
            .cloned()
    }

    pub async fn info(&self) -> StoreInfo {
        let state = self.state.read().await;
        StoreInfo {
            path: self.path.clone(),
            record_count: state.records.len(),
            last_modified: state
                .file_stamp
                .map(|(mtime, _)| chrono::DateTime::<chrono::Utc>::from(mtime)),
            last_error: state.last_error.clone(),
        }
    }

    pub async fn create(&self, record: StaticRecord) -> Result<()> {
        validate(&record)?;
        let _guard = self.write_lock.lock().await;

        let mut candidate = self.state.read().await.records.clone();
        if candidate.iter().any(|r| r.domain == record.domain) {
            return Err(StoreError::DomainConflict(record.domain));
        }
        candidate.push(record);

        self.commit(candidate).await
    }

    pub async fn update(&self, domain: &str, record: StaticRecord) -> Result<()> {
        validate(&record)?;
        let _guard = self.write_lock.lock().await;

        let mut candidate = self.state.read().await.records.clone();
        let Some(position) = candidate.iter().position(|r| r.domain == domain) else {
            return Err(StoreError::NotFound(domain.to_string()));
        };
        // A rename must not collide with another record
        if record.domain != domain && candidate.iter().any(|r| r.domain == record.domain) {
            return Err(StoreError::DomainConflict(record.domain));
        }
        candidate[position] = record;

        self.commit(candidate).await
    }

    pub async fn delete(&self, domain: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut candidate = self.state.read().await.records.clone();
        let Some(position) = candidate.iter().position(|r| r.domain == domain) else {
            return Err(StoreError::NotFound(domain.to_string()));
        };
        candidate.remove(position);

        self.commit(candidate).await
    }

    /// Re-read the file after an external change.
    ///
    /// On parse failure the previous in-memory set stays authoritative
    /// and the error is exposed through `info()`.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let content = tokio::fs::read_to_string(&self.path).await?;
        let stamp = file_stamp(&self.path);
        match serde_yaml::from_str::<StaticRouteFile>(&content) {
            Ok(file) => {
                let mut state = self.state.write().await;
                state.records = dedupe(file.static_routes);
                state.last_error = None;
                state.file_stamp = stamp;
                drop(state);
                info!(path = %self.path.display(), "static routes reloaded from external edit");
                let _ = self.events.send(StoreEvent::Changed);
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "keeping previous routes, file unparseable");
                let mut state = self.state.write().await;
                state.last_error = Some(e.to_string());
                state.file_stamp = stamp;
                Ok(())
            }
        }
    }

    /// Current (mtime, size) stamp the in-memory state corresponds to
    pub(crate) async fn loaded_stamp(&self) -> Option<(SystemTime, u64)> {
        self.state.read().await.file_stamp
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the candidate set, then swap it into memory and notify
    async fn commit(&self, candidate: Vec<StaticRecord>) -> Result<()> {
        let stamp = persist_atomic(&self.path, &candidate).await?;

        let mut state = self.state.write().await;
        state.records = candidate;
        state.last_error = None;
        state.file_stamp = stamp;
        drop(state);

        let _ = self.events.send(StoreEvent::Changed);
        Ok(())
    }
}

/// Records must compile into a service before they are accepted
fn validate(record: &StaticRecord) -> Result<()> {
    let (service, warnings) = compile_static_record(record);
    if service.is_none() {
        let detail = warnings
            .first()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "rejected".to_string());
        return Err(StoreError::Invalid(detail));
    }
    Ok(())
}

/// Duplicate domains are rejected at load time, first record wins
fn dedupe(records: Vec<StaticRecord>) -> Vec<StaticRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if seen.insert(record.domain.clone()) {
            kept.push(record);
        } else {
            warn!(domain = %record.domain, "dropping duplicate static record");
        }
    }
    kept
}

fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Write the full document to a sibling temp file, fsync, then rename
/// over the live file. A crash mid-write leaves the old document.
async fn persist_atomic(
    path: &Path,
    records: &[StaticRecord],
) -> Result<Option<(SystemTime, u64)>> {
    let document = StaticRouteFile {
        static_routes: records.to_vec(),
    };
    let yaml = serde_yaml::to_string(&document)?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<Option<(SystemTime, u64)>> {
        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory)?;

        let mut temp = tempfile::NamedTempFile::new_in(directory)?;
        temp.write_all(yaml.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&path)
            .map_err(|e| StoreError::Io(e.error))?;

        Ok(file_stamp(&path))
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}
