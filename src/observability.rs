use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: API requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "tutord_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "tutord_request_duration_seconds";

/// Counter: booking attempts rejected by the conflict detector.
pub const BOOKING_CONFLICTS_TOTAL: &str = "tutord_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered teachers.
pub const TEACHERS_ACTIVE: &str = "tutord_teachers_active";

/// Counter: pending lessons cancelled by the payment-window reaper.
pub const REAPED_PENDING_TOTAL: &str = "tutord_reaped_pending_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutord_wal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutord_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
