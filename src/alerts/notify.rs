use crate::error::{AppError, Result};
use crate::metrics::NOTIFICATIONS_TOTAL;
use crate::models::Alert;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tracing::{error, info, warn};

/// Why a notification is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    New,
    Escalation,
}

impl NotificationKind {
    fn event_type(&self) -> &'static str {
        match self {
            NotificationKind::New => "alert.triggered",
            NotificationKind::Escalation => "alert.escalated",
        }
    }
}

/// Delivers alert notifications
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, alert: &Alert) -> Result<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, kind: NotificationKind, alert: &Alert) -> Result<()> {
        info!(
            kind = %kind,
            fingerprint = %alert.fingerprint,
            severity = %alert.severity,
            title = %alert.title,
            escalation_level = alert.escalation_level,
            channels = ?alert.channels,
            "Alert notification"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event_type: &'static str,
    timestamp: String,
    alert: &'a Alert,
}

/// POSTs notifications as JSON to one URL, retrying transport errors and 5xx
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    timeout_secs: u64,
    max_attempts: u32,
    base_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout_secs: u64, max_attempts: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout_secs,
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(200),
        })
    }

    /// Override the delay before the first retry (doubles per retry)
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    async fn send_once(&self, payload: &WebhookPayload<'_>) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("User-Agent", concat!("opsgraph/", env!("CARGO_PKG_VERSION")))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!(
                        "Webhook request timed out after {} seconds",
                        self.timeout_secs
                    ))
                } else {
                    AppError::Network(format!("Webhook request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("Webhook returned {}: {}", status, body);
        if status.is_server_error() || status.as_u16() == 429 {
            Err(AppError::Transient(message))
        } else {
            Err(AppError::Validation(message))
        }
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, kind: NotificationKind, alert: &Alert) -> Result<()> {
        let payload = WebhookPayload {
            event_type: kind.event_type(),
            timestamp: Utc::now().to_rfc3339(),
            alert,
        };

        let mut attempt = 1;
        loop {
            match self.send_once(&payload).await {
                Ok(()) => {
                    info!(
                        kind = %kind,
                        fingerprint = %alert.fingerprint,
                        attempt,
                        "Webhook notification sent"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Retrying webhook notification");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Deliver in the background; failures are logged and counted, never surfaced
pub fn spawn_notification(notifier: Arc<dyn AlertNotifier>, kind: NotificationKind, alert: Alert) {
    tokio::spawn(async move {
        deliver(notifier.as_ref(), kind, &alert).await;
    });
}

pub(crate) async fn deliver(notifier: &dyn AlertNotifier, kind: NotificationKind, alert: &Alert) {
    let kind_label = kind.to_string();
    match notifier.notify(kind, alert).await {
        Ok(()) => {
            NOTIFICATIONS_TOTAL
                .with_label_values(&[kind_label.as_str(), "sent"])
                .inc();
        }
        Err(e) => {
            NOTIFICATIONS_TOTAL
                .with_label_values(&[kind_label.as_str(), "failed"])
                .inc();
            error!(
                kind = %kind_label,
                fingerprint = %alert.fingerprint,
                error = %e,
                "Failed to deliver alert notification"
            );
        }
    }
}
