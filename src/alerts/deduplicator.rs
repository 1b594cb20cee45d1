use crate::alerts::notify::{spawn_notification, AlertNotifier, NotificationKind};
use crate::alerts::window::DedupWindow;
use crate::error::{AppError, Result};
use crate::metrics::{ALERTS_ACTIVE, ALERTS_TOTAL};
use crate::models::{
    match_rule, ActiveUpsert, Alert, AlertInput, AlertRule, AlertStats, Severity, TriggerOutcome,
};
use crate::state::{AlertRuleStore, AlertStore};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

/// Collapses repeated alerts into one active alert per fingerprint
pub struct AlertDeduplicator {
    store: Arc<dyn AlertStore>,
    window: Arc<dyn DedupWindow>,
    notifier: Arc<dyn AlertNotifier>,
    rules: Option<Arc<dyn AlertRuleStore>>,
}

impl AlertDeduplicator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        window: Arc<dyn DedupWindow>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            store,
            window,
            notifier,
            rules: None,
        }
    }

    /// Route alerts through the rules in `rules`
    pub fn with_rules(mut self, rules: Arc<dyn AlertRuleStore>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Insert or replace a rule by name; returns it and whether it is new
    pub async fn save_rule(&self, rule: AlertRule) -> Result<(AlertRule, bool)> {
        rule.validate()?;
        if rule.name.trim().is_empty() || rule.condition.trim().is_empty() {
            return Err(AppError::Validation(
                "rule name and condition must not be blank".to_string(),
            ));
        }
        let rules = self.rule_store()?;
        let (rule, created) = rules.upsert_rule(rule).await?;
        tracing::info!(
            rule = %rule.name,
            rule_id = %rule.id,
            created,
            deduplication_window = rule.deduplication_window,
            escalation_delay = rule.escalation_delay,
            "Alert rule saved"
        );
        Ok((rule, created))
    }

    pub async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        self.rule_store()?.list_rules().await
    }

    fn rule_store(&self) -> Result<&Arc<dyn AlertRuleStore>> {
        self.rules
            .as_ref()
            .ok_or_else(|| AppError::Unavailable("Alert rules are not configured".to_string()))
    }

    /// Rule for an alert type; a failing rule store falls back to defaults
    async fn rule_for(&self, alert_type: &str) -> Option<AlertRule> {
        let rules = self.rules.as_ref()?;
        match rules.list_rules().await {
            Ok(rules) => match_rule(&rules, alert_type).cloned(),
            Err(e) => {
                tracing::warn!(alert_type = %alert_type, error = %e, "Alert rules unavailable");
                None
            }
        }
    }

    /// Record an alert; new alerts are notified in the background
    pub async fn trigger(&self, input: AlertInput) -> Result<TriggerOutcome> {
        input.validate()?;
        if input.alert_type.trim().is_empty() || input.title.trim().is_empty() {
            return Err(AppError::Validation(
                "alert type and title must not be blank".to_string(),
            ));
        }

        let now = Utc::now();
        let fingerprint = input.fingerprint();
        let severity = input.severity;
        let rule = self.rule_for(&input.alert_type).await;
        let window = rule
            .as_ref()
            .map(AlertRule::dedup_window)
            .unwrap_or_else(|| self.window.window());

        let claimed = match self.window.claim_for(&fingerprint, window).await {
            Ok(claimed) => claimed,
            Err(e) => {
                // The store's uniqueness rule still holds without the window
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Dedup window unavailable");
                true
            }
        };

        if !claimed {
            if let Some(existing) = self.store.record_occurrence(&fingerprint, now).await? {
                return Ok(self.deduplicated(&existing));
            }
        }

        let mut alert = Alert::from_input(input, now);
        if let Some(rule) = &rule {
            alert = alert.with_rule(rule);
        }

        match self.store.upsert_active(alert).await? {
            ActiveUpsert::Created(alert) => {
                ALERTS_TOTAL
                    .with_label_values(&["triggered", severity.to_string().as_str()])
                    .inc();
                ALERTS_ACTIVE.inc();
                tracing::info!(
                    fingerprint = %alert.fingerprint,
                    alert_id = %alert.id,
                    severity = %alert.severity,
                    title = %alert.title,
                    rule = ?alert.rule,
                    "Alert triggered"
                );
                let outcome = TriggerOutcome::triggered(&alert);
                spawn_notification(self.notifier.clone(), NotificationKind::New, alert);
                Ok(outcome)
            }
            ActiveUpsert::Occurrence(existing) => Ok(self.deduplicated(&existing)),
        }
    }

    fn deduplicated(&self, alert: &Alert) -> TriggerOutcome {
        ALERTS_TOTAL
            .with_label_values(&["deduplicated", alert.severity.to_string().as_str()])
            .inc();
        tracing::debug!(
            fingerprint = %alert.fingerprint,
            occurrence_count = alert.occurrence_count,
            "Alert deduplicated"
        );
        TriggerOutcome::deduplicated(alert)
    }

    /// Close the active alert and reopen its window
    pub async fn resolve(&self, fingerprint: &str) -> Result<Alert> {
        let alert = self
            .store
            .resolve(fingerprint, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No active alert with fingerprint {}", fingerprint)))?;

        ALERTS_ACTIVE.dec();
        if let Err(e) = self.window.release(fingerprint).await {
            tracing::warn!(fingerprint = %fingerprint, error = %e, "Failed to release dedup window");
        }

        tracing::info!(
            fingerprint = %fingerprint,
            occurrence_count = alert.occurrence_count,
            "Alert resolved"
        );
        Ok(alert)
    }

    /// Newest active alerts, at most `limit`
    pub async fn list_active(&self, severity: Option<Severity>, limit: usize) -> Result<Vec<Alert>> {
        let mut alerts = self.store.list_active(severity).await?;
        alerts.truncate(limit);
        Ok(alerts)
    }

    pub async fn stats(&self) -> Result<AlertStats> {
        let alerts = self.store.list_all().await?;
        Ok(AlertStats::from_alerts(&alerts, Utc::now()))
    }
}
