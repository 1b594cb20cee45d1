use crate::error::{AppError, Result};
use crate::ingestion::EventPipeline;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A source of raw event envelopes, one per message
#[async_trait]
pub trait EventSource: Send {
    /// Next envelope; `None` once the source is exhausted
    async fn next_envelope(&mut self) -> Result<Option<Vec<u8>>>;

    fn name(&self) -> &str;
}

/// In-process source fed through a tokio channel
pub struct ChannelEventSource {
    receiver: mpsc::Receiver<Vec<u8>>,
}

/// Create a channel source and the sender that feeds it
pub fn channel(buffer: usize) -> (mpsc::Sender<Vec<u8>>, ChannelEventSource) {
    let (sender, receiver) = mpsc::channel(buffer);
    (sender, ChannelEventSource { receiver })
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_envelope(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.receiver.recv().await)
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Counts of what a consumer run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerReport {
    pub projected: u64,
    pub rejected: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    projected: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Drains an [`EventSource`] through the pipeline with bounded concurrency.
///
/// Delivery is at-least-once and possibly out of order; the projector's
/// natural-key merges make that safe. Bad envelopes are skipped.
pub struct EventConsumer {
    pipeline: EventPipeline,
    concurrency: usize,
}

impl EventConsumer {
    pub fn new(pipeline: EventPipeline, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    /// Consume until the source is exhausted or fails
    pub async fn run<S: EventSource + 'static>(&self, source: S) -> ConsumerReport {
        let source_name = source.name().to_string();
        tracing::info!(source = %source_name, concurrency = self.concurrency, "Event consumer started");

        let envelopes = stream::unfold(source, |mut source| async move {
            match source.next_envelope().await {
                Ok(Some(bytes)) => Some((bytes, source)),
                Ok(None) => None,
                Err(e) => {
                    tracing::error!(source = %source.name(), error = %e, "Event source failed");
                    None
                }
            }
        });

        let counters = Arc::new(Counters::default());
        envelopes
            .for_each_concurrent(self.concurrency, |bytes| {
                let pipeline = self.pipeline.clone();
                let counters = counters.clone();
                async move {
                    match pipeline.handle(&bytes).await {
                        Ok(_) => {
                            counters.projected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(AppError::Schema { .. }) => {
                            counters.rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(error = %e, "Failed to project event");
                        }
                    }
                }
            })
            .await;

        let report = ConsumerReport {
            projected: counters.projected.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        };
        tracing::info!(
            source = %source_name,
            projected = report.projected,
            rejected = report.rejected,
            failed = report.failed,
            "Event consumer stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphProjector, GraphStore, InMemoryGraphStore};
    use crate::models::NodeKey;
    use crate::search::VectorIndex;

    fn pipeline() -> (EventPipeline, Arc<InMemoryGraphStore>) {
        let graph = Arc::new(InMemoryGraphStore::new());
        let index = Arc::new(VectorIndex::new(64, 0.0));
        let projector = GraphProjector::new(graph.clone(), index);
        (EventPipeline::new(Arc::new(projector)), graph)
    }

    #[tokio::test]
    async fn test_malformed_envelopes_are_skipped() {
        let (pipeline, graph) = pipeline();
        let (sender, source) = channel(8);

        sender
            .send(br#"{"kind":"service_health","natural_key":"api","occurred_at":"2024-05-01T10:00:00Z","payload":{"dependencies":["db"]}}"#.to_vec())
            .await
            .unwrap();
        sender.send(b"not json".to_vec()).await.unwrap();
        sender
            .send(br#"{"kind":"teleport","natural_key":"x","occurred_at":"2024-05-01T10:00:00Z","payload":{}}"#.to_vec())
            .await
            .unwrap();
        drop(sender);

        let report = EventConsumer::new(pipeline, 4).run(source).await;
        assert_eq!(report.projected, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.failed, 0);
        assert!(graph.get_node(&NodeKey::service("db")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_redelivery_converges() {
        let (pipeline, graph) = pipeline();
        let (sender, source) = channel(16);
        let envelope = br#"{"kind":"issue_opened","natural_key":"DB-17","occurred_at":"2024-05-01T10:00:00Z","payload":{"title":"DB timeout","component":"db"}}"#;
        for _ in 0..5 {
            sender.send(envelope.to_vec()).await.unwrap();
        }
        drop(sender);

        let report = EventConsumer::new(pipeline, 5).run(source).await;
        assert_eq!(report.projected, 5);
        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
    }
}
