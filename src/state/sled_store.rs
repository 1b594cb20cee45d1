use crate::error::{AppError, Result};
use crate::models::{ActiveUpsert, Alert, AlertRule, Execution, ExecutionStatus, Severity, Workflow};
use crate::state::store::select_active;
use crate::state::{AlertRuleStore, AlertStore, ExecutionStore, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional};
use std::path::Path;
use uuid::Uuid;

/// Persistent state store using the Sled embedded database.
///
/// Values are JSON. Active alerts are keyed by fingerprint so the
/// one-active-alert rule is a compare-and-swap on a single key. Resolving
/// moves an alert between trees in one transaction.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    active_alerts: sled::Tree,
    resolved_alerts: sled::Tree,
    alert_rules: sled::Tree,
    workflows: sled::Tree,
    executions: sled::Tree,
}

impl SledStore {
    /// Open (or create) a store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            AppError::Storage(format!("Failed to open Sled database: {}", e))
        })?;
        tracing::info!(path = ?path.as_ref(), "Opened Sled database");
        Self::new(db)
    }

    /// Use trees of an already-open database
    pub fn new(db: Db) -> Result<Self> {
        Ok(Self {
            active_alerts: db.open_tree("alerts_active")?,
            resolved_alerts: db.open_tree("alerts_resolved")?,
            alert_rules: db.open_tree("alert_rules")?,
            workflows: db.open_tree("workflows")?,
            executions: db.open_tree("executions")?,
            db,
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::Storage(format!("Corrupt record: {}", e)))
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>> {
        tree.iter()
            .map(|item| -> Result<T> {
                let (_, bytes) = item?;
                Self::decode(&bytes)
            })
            .collect()
    }

    /// Apply `update` to the active alert under compare-and-swap
    fn update_active<F>(&self, fingerprint: &str, update: F) -> Result<Option<Alert>>
    where
        F: Fn(&mut Alert) -> bool,
    {
        let key = fingerprint.as_bytes();
        loop {
            let current = match self.active_alerts.get(key)? {
                Some(bytes) => bytes,
                None => return Ok(None),
            };
            let mut alert: Alert = Self::decode(&current)?;
            if !update(&mut alert) {
                return Ok(None);
            }
            let encoded = Self::encode(&alert)?;
            if self
                .active_alerts
                .compare_and_swap(key, Some(current), Some(encoded))?
                .is_ok()
            {
                return Ok(Some(alert));
            }
        }
    }
}

#[async_trait]
impl AlertStore for SledStore {
    async fn upsert_active(&self, alert: Alert) -> Result<ActiveUpsert> {
        let key = alert.fingerprint.as_bytes().to_vec();
        let encoded = Self::encode(&alert)?;

        loop {
            let inserted = self
                .active_alerts
                .compare_and_swap(&key, None as Option<&[u8]>, Some(encoded.clone()))?;
            if inserted.is_ok() {
                tracing::debug!(fingerprint = %alert.fingerprint, "Active alert stored");
                return Ok(ActiveUpsert::Created(alert));
            }

            // Lost the race; count against the winner unless it was resolved meanwhile
            if let Some(existing) = self.record_occurrence(&alert.fingerprint, alert.last_seen).await? {
                return Ok(ActiveUpsert::Occurrence(existing));
            }
        }
    }

    async fn record_occurrence(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>> {
        self.update_active(fingerprint, |alert| {
            alert.record_occurrence(now);
            true
        })
    }

    async fn get_active(&self, fingerprint: &str) -> Result<Option<Alert>> {
        Self::get(&self.active_alerts, fingerprint.as_bytes())
    }

    async fn resolve(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>> {
        let key = fingerprint.as_bytes();
        let resolved = (&self.active_alerts, &self.resolved_alerts).transaction(
            |(active, resolved)| {
                let Some(bytes) = active.remove(key)? else {
                    return Ok(None);
                };
                let mut alert: Alert =
                    serde_json::from_slice(&bytes).map_err(ConflictableTransactionError::Abort)?;
                alert.resolve(now);
                let encoded =
                    serde_json::to_vec(&alert).map_err(ConflictableTransactionError::Abort)?;
                resolved.insert(alert.id.as_bytes().to_vec(), encoded)?;
                Ok(Some(alert))
            },
        )?;
        Ok(resolved)
    }

    async fn mark_escalated(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<Alert>> {
        self.update_active(fingerprint, |alert| {
            if alert.escalated_at.is_some() {
                return false;
            }
            alert.escalate(now);
            true
        })
    }

    async fn list_active(&self, severity: Option<Severity>) -> Result<Vec<Alert>> {
        Ok(select_active(Self::scan(&self.active_alerts)?, severity))
    }

    async fn list_all(&self) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = Self::scan(&self.active_alerts)?;
        alerts.extend(Self::scan::<Alert>(&self.resolved_alerts)?);
        Ok(alerts)
    }
}

#[async_trait]
impl AlertRuleStore for SledStore {
    async fn upsert_rule(&self, mut rule: AlertRule) -> Result<(AlertRule, bool)> {
        let key = rule.name.as_bytes();
        loop {
            let current = self.alert_rules.get(key)?;
            let created = match &current {
                Some(bytes) => {
                    rule.id = Self::decode::<AlertRule>(bytes)?.id;
                    false
                }
                None => true,
            };
            let encoded = Self::encode(&rule)?;
            if self
                .alert_rules
                .compare_and_swap(key, current, Some(encoded))?
                .is_ok()
            {
                tracing::debug!(rule = %rule.name, created, "Alert rule saved to Sled");
                return Ok((rule, created));
            }
        }
    }

    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        // Keys are names, so tree order is name order
        Self::scan(&self.alert_rules)
    }
}

#[async_trait]
impl WorkflowStore for SledStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .insert(workflow.id.as_bytes(), Self::encode(workflow)?)?;
        self.workflows.flush_async().await?;
        tracing::debug!(workflow_id = %workflow.id, "Workflow saved to Sled");
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>> {
        Self::get(&self.workflows, id.as_bytes())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = Self::scan(&self.workflows)?;
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }
}

#[async_trait]
impl ExecutionStore for SledStore {
    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        self.executions
            .insert(execution.execution_id.as_bytes(), Self::encode(execution)?)?;
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>> {
        Self::get(&self.executions, id.as_bytes())
    }

    async fn list_executions(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>> {
        let mut executions: Vec<Execution> = Self::scan(&self.executions)?;
        executions.retain(|e| statuses.is_empty() || statuses.contains(&e.status));
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(executions)
    }
}
