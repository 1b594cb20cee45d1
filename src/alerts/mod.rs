//! Alert deduplication, escalation and notification routing.
//!
//! A trigger first claims its fingerprint in the [`DedupWindow`]; losers
//! record an occurrence on the active alert. The [`AlertStore`] enforces
//! one active alert per fingerprint independently of the window, so a
//! window that expired or is unreachable still cannot produce duplicates.
//!
//! [`AlertStore`]: crate::state::AlertStore

pub mod deduplicator;
pub mod escalation;
pub mod notify;
pub mod window;

pub use deduplicator::AlertDeduplicator;
pub use escalation::EscalationEvaluator;
pub use notify::{AlertNotifier, LogNotifier, NotificationKind, WebhookNotifier};
pub use window::{DedupWindow, MokaDedupWindow, RedisDedupWindow};

use crate::config::{AlertConfig, DedupBackend, StateConfig};
use crate::error::{AppError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Create the dedup window selected by configuration
pub async fn create_window(alerts: &AlertConfig, state: &StateConfig) -> Result<Arc<dyn DedupWindow>> {
    let window = Duration::from_secs(alerts.dedup_window_secs);
    match alerts.dedup_backend {
        DedupBackend::Memory => {
            tracing::info!(window_secs = alerts.dedup_window_secs, "Initializing in-process dedup window");
            Ok(Arc::new(MokaDedupWindow::new(window, alerts.dedup_capacity)))
        }
        DedupBackend::Redis => {
            let url = state.redis_url.as_ref().ok_or_else(|| {
                AppError::Configuration("Redis dedup window requires 'state.redis_url'".to_string())
            })?;
            Ok(Arc::new(RedisDedupWindow::new(url, window).await?))
        }
    }
}

/// Create the notifier selected by configuration
pub fn create_notifier(config: &AlertConfig) -> Result<Arc<dyn AlertNotifier>> {
    match &config.notification_url {
        Some(url) => {
            tracing::info!(url = %url, "Alert notifications routed to webhook");
            Ok(Arc::new(WebhookNotifier::new(
                url.clone(),
                config.notification_timeout_secs,
                config.notification_max_attempts,
            )?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
