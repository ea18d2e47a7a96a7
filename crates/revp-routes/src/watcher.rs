//! External-edit detection by mtime/size polling

use crate::store::StaticRouteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poll the route file's mtime and size; reload the store when an
/// external writer replaced it. The store's own writes refresh the
/// stamp, so they do not trigger a reload.
pub async fn watch_store(
    store: Arc<StaticRouteStore>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = std::fs::metadata(store.path())
            .ok()
            .and_then(|meta| Some((meta.modified().ok()?, meta.len())));
        let loaded = store.loaded_stamp().await;

        match (current, loaded) {
            (Some(current), Some(loaded)) if current != loaded => {
                debug!(path = %store.path().display(), "static route file changed externally");
                if let Err(e) = store.reload().await {
                    warn!(error = %e, "static route reload failed");
                }
            }
            (Some(_), None) => {
                // File appeared after an empty start
                if let Err(e) = store.reload().await {
                    warn!(error = %e, "static route reload failed");
                }
            }
            _ => {}
        }
    }
    debug!("static route watcher stopped");
}
