pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::alerts::{AlertDeduplicator, EscalationEvaluator};
use crate::graph::GraphStore;
use crate::ingestion::EventPipeline;
use crate::orchestrator::{WorkflowOrchestrator, WorkflowScheduler};
use crate::rca::RcaSynthesizer;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: EventPipeline,
    pub rca: Arc<RcaSynthesizer>,
    pub alerts: Arc<AlertDeduplicator>,
    pub escalation: Arc<EscalationEvaluator>,
    pub orchestrator: WorkflowOrchestrator,
    pub scheduler: Option<Arc<WorkflowScheduler>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        pipeline: EventPipeline,
        rca: Arc<RcaSynthesizer>,
        alerts: Arc<AlertDeduplicator>,
        escalation: Arc<EscalationEvaluator>,
        orchestrator: WorkflowOrchestrator,
    ) -> Self {
        Self {
            pipeline,
            rca,
            alerts,
            escalation,
            orchestrator,
            scheduler: None,
            started_at: Instant::now(),
        }
    }

    /// Register cron-scheduled workflows with this scheduler as they are created
    pub fn with_scheduler(mut self, scheduler: Arc<WorkflowScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        self.pipeline.projector().graph()
    }
}
