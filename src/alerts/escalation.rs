use crate::alerts::notify::{deliver, AlertNotifier, NotificationKind};
use crate::error::Result;
use crate::metrics::ALERTS_ESCALATED_TOTAL;
use crate::models::Alert;
use crate::state::AlertStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Escalates active alerts that stayed open longer than the delay.
///
/// Alerts created under a rule carry their own delay.
pub struct EscalationEvaluator {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn AlertNotifier>,
    delay: chrono::Duration,
}

impl EscalationEvaluator {
    pub fn new(store: Arc<dyn AlertStore>, notifier: Arc<dyn AlertNotifier>, delay: Duration) -> Self {
        Self {
            store,
            notifier,
            delay: chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(900)),
        }
    }

    /// Escalate every due alert once; returns the alerts escalated by this call
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut escalated = Vec::new();

        for alert in self.store.list_active(None).await? {
            if !alert.needs_escalation(now, alert.escalation_delay(self.delay)) {
                continue;
            }
            // None means another evaluator got there first
            let Some(alert) = self.store.mark_escalated(&alert.fingerprint, now).await? else {
                continue;
            };

            ALERTS_ESCALATED_TOTAL
                .with_label_values(&[alert.severity.to_string().as_str()])
                .inc();
            tracing::warn!(
                fingerprint = %alert.fingerprint,
                severity = %alert.severity,
                age_minutes = alert.age_minutes(now),
                escalation_level = alert.escalation_level,
                "Alert escalated"
            );
            deliver(self.notifier.as_ref(), NotificationKind::Escalation, &alert).await;
            escalated.push(alert);
        }

        Ok(escalated)
    }

    /// Evaluate every `interval` until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(check_interval_secs = interval.as_secs(), "Starting escalation evaluator");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.evaluate(Utc::now()).await {
                            tracing::error!(error = %e, "Escalation evaluation failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Escalation evaluator stopped");
        })
    }
}
