use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::WalStore;

/// Compact once at least `threshold` records were appended since the last
/// compaction.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appended = store.appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appended} appends");
            true
        }
        Err(e) => {
            tracing::warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}
