use async_trait::async_trait;
use serde_json::Value;

/// External audit-trail collaborator. Called after every successful
/// mutating operation; fire-and-forget, so implementations must not
/// fail the calling operation.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, actor: &str, action: &str, before: Option<Value>, after: Option<Value>);
}

/// Default recorder: structured log lines only.
pub struct TracingAudit;

#[async_trait]
impl AuditRecorder for TracingAudit {
    async fn record(&self, actor: &str, action: &str, before: Option<Value>, after: Option<Value>) {
        tracing::info!(
            actor,
            action,
            before = before.map(|v| v.to_string()).unwrap_or_default(),
            after = after.map(|v| v.to_string()).unwrap_or_default(),
            "audit"
        );
    }
}
