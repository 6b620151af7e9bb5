use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "coachbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "coachbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "coachbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "coachbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "coachbook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "coachbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "coachbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "coachbook_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: bookings committed. Labels: type.
pub const BOOKINGS_CREATED_TOTAL: &str = "coachbook_bookings_created_total";

/// Counter: package sessions credited back by booking deletion.
pub const REFUNDS_TOTAL: &str = "coachbook_refunds_total";

/// Counter: past confirmed sessions marked completed by the sweeper.
pub const SWEPT_BOOKINGS_TOTAL: &str = "coachbook_swept_bookings_total";

/// Counter: debits refused by the ledger. Labels: reason.
pub const LEDGER_REJECTIONS_TOTAL: &str = "coachbook_ledger_rejections_total";

/// Counter: subscriptions replenished by the background job.
pub const REPLENISHMENTS_TOTAL: &str = "coachbook_replenishments_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("failed to install Prometheus exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCoach { .. } => "insert_coach",
        Command::UpdateCoach { .. } => "update_coach",
        Command::InsertWorkingWindow { .. } => "insert_working_window",
        Command::DeleteWorkingWindow { .. } => "delete_working_window",
        Command::InsertTimeOff { .. } => "insert_time_off",
        Command::DeleteTimeOff { .. } => "delete_time_off",
        Command::InsertPackage(_) => "insert_package",
        Command::GrantPackageSessions { .. } => "grant_package_sessions",
        Command::AdjustPackage { .. } => "adjust_package",
        Command::InsertSubscription(_) => "insert_subscription",
        Command::SetSubscriptionActive { .. } => "set_subscription_active",
        Command::Replenish { .. } => "replenish",
        Command::AdjustSubscription { .. } => "adjust_subscription",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::TransitionBooking { .. } => "transition_booking",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::Sweep { .. } => "sweep",
        Command::DeleteBookings { .. } => "delete_bookings",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectOpenTime { .. } => "select_open_time",
        Command::SelectCoaches => "select_coaches",
        Command::SelectWorkingWindows { .. } => "select_working_windows",
        Command::SelectTimeOff { .. } => "select_time_off",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectPackages { .. } => "select_packages",
        Command::SelectPackageAdjustments { .. } => "select_package_adjustments",
        Command::SelectSubscriptions { .. } => "select_subscriptions",
        Command::SelectCheckinUsage { .. } => "select_checkin_usage",
    }
}
