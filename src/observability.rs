use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: mutating operations. Labels: op, outcome.
pub const OPS_TOTAL: &str = "agendar_ops_total";

/// Counter: cpf blocks issued by the cancellation throttle.
pub const CPF_BLOCKS_ISSUED_TOTAL: &str = "agendar_cpf_blocks_issued_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "agendar_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "agendar_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "agendar_wal_flush_batch_size";

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

/// Install the default tracing subscriber (env-filtered). For embedders
/// that don't bring their own.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

/// Map an error to a short label for metrics.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::SlotUnavailable => "slot_unavailable",
        EngineError::DateBlocked => "date_blocked",
        EngineError::CpfBlocked { .. } => "cpf_blocked",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::RescheduleLimitExceeded => "reschedule_limit",
        EngineError::NotFound(_) => "not_found",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::TenantMismatch { .. } => "tenant_mismatch",
        EngineError::InvalidField(_) => "invalid_field",
        EngineError::Storage(_) => "storage",
    }
}
