use crate::error::Result;
use crate::models::{ActiveUpsert, Alert, AlertRule, Execution, ExecutionStatus, Severity, Workflow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Alert repository enforcing at most one active alert per fingerprint
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Store `alert` unless an active alert with the same fingerprint exists,
    /// in which case that alert has an occurrence recorded instead. Atomic.
    async fn upsert_active(&self, alert: Alert) -> Result<ActiveUpsert>;

    /// Increment the occurrence count of the active alert, if any
    async fn record_occurrence(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>>;

    /// Get the active alert for a fingerprint
    async fn get_active(&self, fingerprint: &str) -> Result<Option<Alert>>;

    /// Close the active alert; returns it if one existed
    async fn resolve(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>>;

    /// Mark the active alert escalated unless it already is
    async fn mark_escalated(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>>;

    /// Active alerts, newest first, optionally of one severity
    async fn list_active(&self, severity: Option<Severity>) -> Result<Vec<Alert>>;

    /// Every alert, active and resolved
    async fn list_all(&self) -> Result<Vec<Alert>>;
}

/// Alert rules keyed by name
#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    /// Insert or replace the rule with the same name; a replaced rule keeps
    /// its id. Returns the stored rule and whether it is new.
    async fn upsert_rule(&self, rule: AlertRule) -> Result<(AlertRule, bool)>;

    /// All rules, in name order
    async fn list_rules(&self) -> Result<Vec<AlertRule>>;
}

/// Registered workflow definitions
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>>;

    /// All workflows, oldest first
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;
}

/// Workflow execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace an execution
    async fn save_execution(&self, execution: &Execution) -> Result<()>;

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>>;

    /// Executions in any of `statuses`; all when empty
    async fn list_executions(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>>;
}

/// Sort newest first and apply the optional severity filter
pub(crate) fn select_active(mut alerts: Vec<Alert>, severity: Option<Severity>) -> Vec<Alert> {
    alerts.retain(|a| a.is_active() && severity.map_or(true, |s| a.severity == s));
    alerts.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
    alerts
}
