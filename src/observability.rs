use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "sessiond_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "sessiond_query_duration_seconds";

/// Counter: bookings accepted.
pub const BOOKINGS_CREATED_TOTAL: &str = "sessiond_bookings_created_total";

/// Counter: booking attempts rejected because a slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "sessiond_booking_conflicts_total";

/// Counter: booking status transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "sessiond_transitions_total";

/// Counter: pending_payment bookings cancelled by the reaper.
pub const PAYMENTS_EXPIRED_TOTAL: &str = "sessiond_payments_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "sessiond_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "sessiond_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "sessiond_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "sessiond_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "sessiond_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "sessiond_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "sessiond_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCoach { .. } => "insert_coach",
        Command::UpdateCoach { .. } => "update_coach",
        Command::DeleteCoach { .. } => "delete_coach",
        Command::OpenDate { .. } => "open_date",
        Command::CloseDate { .. } => "close_date",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::SelectCoaches => "select_coaches",
        Command::SelectOpenDays { .. } => "select_open_days",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookingsForCoach { .. } => "select_bookings_for_coach",
        Command::SelectBookingsForClient { .. } => "select_bookings_for_client",
        Command::SelectNextSession { .. } => "select_next_session",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}
