use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "reservd_http_requests_total";

/// Histogram: HTTP handler latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "reservd_http_request_duration_seconds";

/// Counter: reservation orders created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "reservd_reservations_created_total";

/// Counter: reservation lines removed through the cancel endpoint.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "reservd_reservations_cancelled_total";

/// Counter: orders cancelled. Labels: source (manual, sweep).
pub const ORDERS_CANCELLED_TOTAL: &str = "reservd_orders_cancelled_total";

/// Counter: rejected slots. Labels: kind (time_block, reservation).
pub const CONFLICTS_TOTAL: &str = "reservd_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of loaded businesses.
pub const TENANTS_ACTIVE: &str = "reservd_tenants_active";

/// Counter: committed transactions.
pub const TXN_COMMITTED_TOTAL: &str = "reservd_txn_committed_total";

/// Counter: transactions abandoned after the lock wait was exhausted.
pub const TXN_BUSY_TOTAL: &str = "reservd_txn_busy_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reservd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reservd_wal_flush_batch_size";

/// Counter: jobs accepted by the queue.
pub const JOBS_ENQUEUED_TOTAL: &str = "reservd_jobs_enqueued_total";

/// Counter: jobs rejected because the queue was full or closed.
pub const JOBS_DROPPED_TOTAL: &str = "reservd_jobs_dropped_total";

/// Counter: jobs finished. Labels: job.
pub const JOBS_COMPLETED_TOTAL: &str = "reservd_jobs_completed_total";

/// Counter: jobs given up after the last attempt. Labels: job.
pub const JOBS_FAILED_TOTAL: &str = "reservd_jobs_failed_total";

/// Counter: expired drafts evicted by the reaper.
pub const DRAFTS_PURGED_TOTAL: &str = "reservd_drafts_purged_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
