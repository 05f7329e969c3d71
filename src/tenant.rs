use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::audit::AuditRecorder;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Manages per-tenant engines. Each municipal tenant gets its own
/// Engine + WAL + maintenance tasks; isolation is by construction, not
/// caller discipline.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    config: ScheduleConfig,
    compact_threshold: u64,
    audit: Arc<dyn AuditRecorder>,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        config: ScheduleConfig,
        compact_threshold: u64,
        audit: Arc<dyn AuditRecorder>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            config,
            compact_threshold,
            audit,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(
            tenant,
            wal_path,
            self.config.clone(),
            notify,
            self.audit.clone(),
        )?);

        // Spawn ledger reaper + WAL compactor for this tenant
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    /// Look up an already-loaded tenant without creating it.
    pub fn get(&self, tenant: &str) -> Option<Arc<Engine>> {
        self.engines.get(tenant).map(|e| e.value().clone())
    }
}
