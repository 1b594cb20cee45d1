//! NATS subscription as an event source

use crate::config::MessagingConfig;
use crate::error::{AppError, Result};
use crate::ingestion::EventSource;
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// Envelopes from one or more NATS subjects (wildcards allowed), merged
pub struct NatsEventSource {
    _client: Client,
    messages: BoxStream<'static, async_nats::Message>,
}

impl NatsEventSource {
    /// Connect and subscribe to every configured subject
    pub async fn connect(config: &MessagingConfig) -> Result<Self> {
        let client = async_nats::connect(&config.nats_url)
            .await
            .map_err(|e| AppError::Unavailable(format!("NATS connection failed: {}", e)))?;

        if config.subjects.is_empty() {
            return Err(AppError::Configuration(
                "messaging.subjects must name at least one subject".to_string(),
            ));
        }

        let mut subscribers = Vec::with_capacity(config.subjects.len());
        for subject in &config.subjects {
            let subscriber = client
                .subscribe(subject.clone())
                .await
                .map_err(|e| AppError::Unavailable(format!("NATS subscribe failed: {}", e)))?;
            tracing::info!(subject = %subject, "Subscribed to NATS subject");
            subscribers.push(subscriber);
        }

        Ok(Self {
            _client: client,
            messages: stream::select_all(subscribers).boxed(),
        })
    }
}

#[async_trait]
impl EventSource for NatsEventSource {
    async fn next_envelope(&mut self) -> Result<Option<Vec<u8>>> {
        // Core NATS has no acknowledgements; redelivery is the publisher's concern
        Ok(self.messages.next().await.map(|msg| msg.payload.to_vec()))
    }

    fn name(&self) -> &str {
        "nats"
    }
}
