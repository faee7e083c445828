use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tarmac_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tarmac_query_duration_seconds";

/// Counter: booking commits rejected at the conflict check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "tarmac_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tarmac_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tarmac_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tarmac_connections_rejected_total";

/// Gauge: number of active schools (loaded engines).
pub const SCHOOLS_ACTIVE: &str = "tarmac_schools_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tarmac_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tarmac_wal_flush_batch_size";

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
        Command::InsertInstructor { .. } => "insert_instructor",
        Command::UpdateInstructor { .. } => "update_instructor",
        Command::DeleteInstructor { .. } => "delete_instructor",
        Command::InsertWeeklyRule { .. } => "insert_schedule_rule",
        Command::UpdateWeeklyRule { .. } => "update_schedule_rule",
        Command::DeleteWeeklyRule { .. } => "delete_schedule_rule",
        Command::InsertTimeOff { .. } => "insert_time_off",
        Command::DeleteTimeOff { .. } => "delete_time_off",
        Command::InsertOverride { .. } => "insert_override",
        Command::DeleteOverride { .. } => "delete_override",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectInstructors => "select_instructors",
        Command::SelectWeeklyRules { .. } => "select_schedule_rules",
        Command::SelectTimeOff { .. } => "select_time_off",
        Command::SelectOverrides { .. } => "select_overrides",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
    }
}
