use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const REQUESTS_TOTAL: &str = "vespers_requests_total";

/// Histogram: request latency in seconds. Labels: method, route.
pub const REQUEST_DURATION_SECONDS: &str = "vespers_request_duration_seconds";

// ── Scheduling outcomes ─────────────────────────────────────────

/// Counter: writes refused because the slot was taken. Labels: op.
pub const SLOT_CONFLICTS_TOTAL: &str = "vespers_slot_conflicts_total";

/// Counter: booking requests accepted as pending.
pub const BOOKINGS_SUBMITTED_TOTAL: &str = "vespers_bookings_submitted_total";

/// Counter: staff decisions on booking requests. Labels: outcome.
pub const BOOKING_DECISIONS_TOTAL: &str = "vespers_booking_decisions_total";

/// Counter: schedule entry writes. Labels: op.
pub const SCHEDULE_WRITES_TOTAL: &str = "vespers_schedule_writes_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vespers_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vespers_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "vespers_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
