//! Event ingestion: envelope codec, event sources and the decode → project pipeline

pub mod codec;
pub mod consumer;
pub mod nats;

pub use consumer::{channel, ChannelEventSource, ConsumerReport, EventConsumer, EventSource};
pub use nats::NatsEventSource;

use crate::error::{AppError, Result};
use crate::graph::{GraphProjector, ProjectionResult};
use crate::metrics::EVENTS_REJECTED_TOTAL;
use crate::models::Event;
use std::sync::Arc;

/// Decodes raw envelopes and projects them into the graph
#[derive(Clone)]
pub struct EventPipeline {
    projector: Arc<GraphProjector>,
}

impl EventPipeline {
    pub fn new(projector: Arc<GraphProjector>) -> Self {
        Self { projector }
    }

    pub fn projector(&self) -> &Arc<GraphProjector> {
        &self.projector
    }

    /// Decode one envelope and project it
    pub async fn handle(&self, bytes: &[u8]) -> Result<ProjectionResult> {
        let event = codec::decode(bytes).map_err(record_rejection)?;
        self.projector.project(&event).await
    }

    /// Decode an already-parsed envelope and project it
    pub async fn handle_value(&self, value: serde_json::Value) -> Result<ProjectionResult> {
        let event = codec::decode_value(value).map_err(record_rejection)?;
        self.projector.project(&event).await
    }

    pub async fn project(&self, event: &Event) -> Result<ProjectionResult> {
        self.projector.project(event).await
    }
}

fn record_rejection(err: AppError) -> AppError {
    if let AppError::Schema { field, reason } = &err {
        EVENTS_REJECTED_TOTAL
            .with_label_values(&[field.as_str()])
            .inc();
        tracing::warn!(field = %field, reason = %reason, "Rejected event envelope");
    }
    err
}
