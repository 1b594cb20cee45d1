use crate::error::Result;
use crate::models::{ActiveUpsert, Alert, AlertRule, Execution, ExecutionStatus, Severity, Workflow};
use crate::state::store::select_active;
use crate::state::{AlertRuleStore, AlertStore, ExecutionStore, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory state store (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    active_alerts: Arc<DashMap<String, Alert>>,
    resolved_alerts: Arc<DashMap<Uuid, Alert>>,
    rules: Arc<DashMap<String, AlertRule>>,
    workflows: Arc<DashMap<Uuid, Workflow>>,
    executions: Arc<DashMap<Uuid, Execution>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn upsert_active(&self, alert: Alert) -> Result<ActiveUpsert> {
        match self.active_alerts.entry(alert.fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().record_occurrence(alert.last_seen);
                Ok(ActiveUpsert::Occurrence(entry.get().clone()))
            }
            Entry::Vacant(entry) => {
                tracing::debug!(fingerprint = %alert.fingerprint, "Active alert stored");
                entry.insert(alert.clone());
                Ok(ActiveUpsert::Created(alert))
            }
        }
    }

    async fn record_occurrence(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>> {
        Ok(self.active_alerts.get_mut(fingerprint).map(|mut entry| {
            entry.record_occurrence(now);
            entry.clone()
        }))
    }

    async fn get_active(&self, fingerprint: &str) -> Result<Option<Alert>> {
        Ok(self.active_alerts.get(fingerprint).map(|entry| entry.clone()))
    }

    async fn resolve(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>> {
        Ok(self.active_alerts.remove(fingerprint).map(|(_, mut alert)| {
            alert.resolve(now);
            self.resolved_alerts.insert(alert.id, alert.clone());
            alert
        }))
    }

    async fn mark_escalated(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>> {
        Ok(self
            .active_alerts
            .get_mut(fingerprint)
            .and_then(|mut entry| {
                if entry.escalated_at.is_some() {
                    return None;
                }
                entry.escalate(now);
                Some(entry.clone())
            }))
    }

    async fn list_active(&self, severity: Option<Severity>) -> Result<Vec<Alert>> {
        let alerts = self
            .active_alerts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        Ok(select_active(alerts, severity))
    }

    async fn list_all(&self) -> Result<Vec<Alert>> {
        Ok(self
            .active_alerts
            .iter()
            .map(|e| e.value().clone())
            .chain(self.resolved_alerts.iter().map(|e| e.value().clone()))
            .collect())
    }
}

#[async_trait]
impl AlertRuleStore for InMemoryStore {
    async fn upsert_rule(&self, mut rule: AlertRule) -> Result<(AlertRule, bool)> {
        match self.rules.entry(rule.name.clone()) {
            Entry::Occupied(mut entry) => {
                rule.id = entry.get().id;
                entry.insert(rule.clone());
                Ok((rule, false))
            }
            Entry::Vacant(entry) => {
                entry.insert(rule.clone());
                Ok((rule, true))
            }
        }
    }

    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = self.rules.iter().map(|e| e.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(id).map(|entry| entry.clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> =
            self.workflows.iter().map(|e| e.value().clone()).collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        self.executions
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>> {
        Ok(self.executions.get(id).map(|entry| entry.clone()))
    }

    async fn list_executions(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>> {
        let mut executions: Vec<Execution> = self
            .executions
            .iter()
            .filter(|e| statuses.is_empty() || statuses.contains(&e.status))
            .map(|e| e.value().clone())
            .collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(executions)
    }
}
