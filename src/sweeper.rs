use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine};
use crate::model::Ms;

/// How often the compactor checks the WAL append counter.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task: complete past sessions and top up subscriptions.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine, now_ms()).await;
    }
}

/// One maintenance pass at `now`. Returns (sessions completed, subscriptions replenished).
/// Each coach's subscriptions are topped up for the coach-local month of `now`.
pub async fn sweep_once(engine: &Engine, now: Ms) -> (usize, usize) {
    let swept = match engine.sweep_all(now).await {
        Ok(n) => n,
        Err(e) => {
            warn!("sweep failed, retrying next tick: {e}");
            0
        }
    };

    let replenished = match engine.replenish_due(now).await {
        Ok(n) => n,
        Err(e) => {
            warn!("replenishment failed, retrying next tick: {e}");
            0
        }
    };

    if swept > 0 || replenished > 0 {
        info!("maintenance: {swept} sessions completed, {replenished} subscriptions replenished");
        metrics::counter!(crate::observability::REPLENISHMENTS_TOTAL).increment(replenished as u64);
    } else {
        debug!("maintenance: nothing to do");
    }
    (swept, replenished)
}

/// Background task: rewrite the WAL as snapshots once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// `true` if a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends} appends < {threshold}");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
