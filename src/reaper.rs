use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::now_ms;
use crate::engine::Engine;
use crate::jobs::{CancelOrderJob, Job, JobQueue};
use crate::limits::MAX_CANCEL_BATCH;
use crate::model::Ms;
use crate::tenant::TenantManager;

/// Background task that periodically queues cancellation of overdue online
/// orders and drops expired drafts.
pub async fn run_reaper(tenants: Arc<TenantManager>, jobs: JobQueue, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let queued = sweep_overdue_orders(&tenants, &jobs, now_ms()).await;
        if queued > 0 {
            info!(queued, "queued overdue order cancellations");
        }
        let purged = tenants.drafts().purge_expired();
        if purged > 0 {
            debug!(purged, "purged expired drafts");
            metrics::counter!(crate::observability::DRAFTS_PURGED_TOTAL).increment(purged as u64);
        }
    }
}

/// One pass over every business. Returns how many jobs were queued.
pub async fn sweep_overdue_orders(tenants: &TenantManager, jobs: &JobQueue, now: Ms) -> usize {
    let mut queued = 0;
    for engine in tenants.engines() {
        for order_id in engine.collect_overdue_online_orders(now, MAX_CANCEL_BATCH).await {
            let job = Job::CancelOrder(CancelOrderJob {
                business_id: engine.business_id,
                order_id,
                as_of: now,
            });
            if jobs.enqueue(job) {
                queued += 1;
            }
        }
    }
    queued
}

/// Compact a business's WAL once enough commits have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(business = %engine.business_id, "compacted WAL"),
            Err(e) => warn!(business = %engine.business_id, "WAL compaction failed: {e}"),
        }
    }
}
