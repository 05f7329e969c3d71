use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically drops ledger rows that can no
/// longer influence a rolling count and expires stale cpf blocks.
/// Expiry itself is enforced at read time; this only reclaims memory.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        engine.prune_expired(now);
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_backlog().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(tenant = %engine.tenant, appends, "compacted WAL"),
            Err(e) => tracing::warn!(tenant = %engine.tenant, "WAL compaction failed: {e}"),
        }
    }
}
