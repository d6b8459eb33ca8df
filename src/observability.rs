use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: external store calls. Labels: op, status.
pub const STORE_CALLS_TOTAL: &str = "hallpass_store_calls_total";

/// Counter: external store calls abandoned at the client-side deadline.
pub const STORE_TIMEOUTS_TOTAL: &str = "hallpass_store_timeouts_total";

/// Counter: wholesale snapshot reloads. Labels: entity, outcome.
pub const SNAPSHOT_RELOADS_TOTAL: &str = "hallpass_snapshot_reloads_total";

/// Counter: reservations committed (single and series rows).
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "hallpass_reservations_committed_total";

/// Counter: recurring series rejected by occurrence conflicts.
pub const SERIES_REJECTED_TOTAL: &str = "hallpass_series_rejected_total";

// ── USE metrics (cached state) ──────────────────────────────────

/// Gauge: rooms in the current snapshot.
pub const SNAPSHOT_ROOMS: &str = "hallpass_snapshot_rooms";

/// Gauge: reservations in the current snapshot.
pub const SNAPSHOT_RESERVATIONS: &str = "hallpass_snapshot_reservations";

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
