//! Cron scheduling of workflows with tokio-cron-scheduler

use crate::error::{AppError, Result};
use crate::models::Workflow;
use crate::orchestrator::WorkflowOrchestrator;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Trigger recorded on executions started by a schedule
pub const SCHEDULE_TRIGGER: &str = "schedule";

/// Check that `expr` is a cron expression the scheduler accepts
/// (six fields, seconds first)
pub fn validate_schedule(expr: &str) -> Result<()> {
    Job::new_async(expr, |_uuid, _scheduler| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| AppError::Validation(format!("invalid schedule '{}': {}", expr, e)))
}

/// Submits scheduled workflows at their cron times
pub struct WorkflowScheduler {
    scheduler: JobScheduler,
    orchestrator: WorkflowOrchestrator,
    /// workflow id -> job id
    jobs: Arc<DashMap<Uuid, Uuid>>,
}

impl WorkflowScheduler {
    pub async fn new(orchestrator: WorkflowOrchestrator) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            orchestrator,
            jobs: Arc::new(DashMap::new()),
        })
    }

    /// Add a job for the workflow; returns false when it has no schedule or is disabled
    pub async fn schedule(&self, workflow: &Workflow) -> Result<bool> {
        let Some(expr) = workflow.schedule.as_deref() else {
            return Ok(false);
        };
        if !workflow.enabled {
            debug!(workflow_id = %workflow.id, "Skipping disabled workflow");
            return Ok(false);
        }
        if self.jobs.contains_key(&workflow.id) {
            return Ok(true);
        }

        let orchestrator = self.orchestrator.clone();
        let workflow_id = workflow.id;
        let job = Job::new_async(expr, move |_uuid, _scheduler| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                match orchestrator.submit(workflow_id, SCHEDULE_TRIGGER).await {
                    Ok(execution_id) => info!(
                        workflow_id = %workflow_id,
                        execution_id = %execution_id,
                        "Scheduled workflow submitted"
                    ),
                    Err(e) => error!(
                        workflow_id = %workflow_id,
                        error = %e,
                        "Failed to submit scheduled workflow"
                    ),
                }
            })
        })
        .map_err(|e| AppError::Validation(format!("invalid schedule '{}': {}", expr, e)))?;

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to add scheduled job: {}", e)))?;
        self.jobs.insert(workflow.id, job_id);

        info!(workflow_id = %workflow.id, schedule = %expr, "Workflow scheduled");
        Ok(true)
    }

    /// Stop scheduling a workflow
    pub async fn unschedule(&self, workflow_id: Uuid) -> Result<bool> {
        let Some((_, job_id)) = self.jobs.remove(&workflow_id) else {
            return Ok(false);
        };
        self.scheduler
            .remove(&job_id)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to remove scheduled job: {}", e)))?;
        Ok(true)
    }

    /// Schedule every stored workflow that has a schedule
    pub async fn load_all(&self) -> Result<usize> {
        let mut scheduled = 0;
        for workflow in self.orchestrator.list_workflows().await? {
            if self.schedule(&workflow).await? {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    pub fn scheduled_count(&self) -> usize {
        self.jobs.len()
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to start scheduler: {}", e)))?;
        info!(jobs = self.jobs.len(), "Workflow scheduler started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to stop scheduler: {}", e)))?;
        info!("Workflow scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{WorkflowDefinition, WorkflowStep};
    use crate::orchestrator::{AllowList, StepLimits, StepOutcome, StepRunner};
    use crate::state::InMemoryStore;
    use async_trait::async_trait;
    use reqwest::Url;
    use std::time::Duration;

    #[test]
    fn test_validate_schedule() {
        assert!(validate_schedule("0 */5 * * * *").is_ok());
        assert!(validate_schedule("1/10 * * * * *").is_ok());
        assert!(validate_schedule("every tuesday").is_err());
        assert!(validate_schedule("").is_err());
    }

    struct AlwaysOk;

    #[async_trait]
    impl StepRunner for AlwaysOk {
        async fn run(
            &self,
            _step: &WorkflowStep,
            _url: &Url,
            _timeout: Duration,
        ) -> StepOutcome {
            StepOutcome::Success {
                output: serde_json::Value::Null,
            }
        }
    }

    fn orchestrator() -> WorkflowOrchestrator {
        let store = Arc::new(InMemoryStore::new());
        WorkflowOrchestrator::new(
            store.clone(),
            store,
            Arc::new(AlwaysOk),
            AllowList::new(["ops.internal"], 443..=443, false),
            StepLimits::default(),
        )
    }

    fn definition(schedule: Option<&str>, enabled: bool) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "heartbeat".into(),
            description: None,
            steps: vec![WorkflowStep::new("ping", "https://ops.internal/ping")],
            schedule: schedule.map(str::to_string),
            enabled,
        }
    }

    #[tokio::test]
    async fn test_only_enabled_scheduled_workflows_get_jobs() {
        let orch = orchestrator();
        let scheduler = WorkflowScheduler::new(orch.clone()).await.unwrap();

        let manual = orch.register(definition(None, true)).await.unwrap();
        let paused = orch.register(definition(Some("0 0 * * * *"), false)).await.unwrap();
        let hourly = orch.register(definition(Some("0 0 * * * *"), true)).await.unwrap();

        assert!(!scheduler.schedule(&manual).await.unwrap());
        assert!(!scheduler.schedule(&paused).await.unwrap());
        assert!(scheduler.schedule(&hourly).await.unwrap());
        assert_eq!(scheduler.load_all().await.unwrap(), 1);
        assert_eq!(scheduler.scheduled_count(), 1);

        assert!(scheduler.unschedule(hourly.id).await.unwrap());
        assert!(!scheduler.unschedule(hourly.id).await.unwrap());
        assert_eq!(scheduler.scheduled_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_schedule_submits_executions() {
        let orch = orchestrator();
        let scheduler = WorkflowScheduler::new(orch.clone()).await.unwrap();
        let workflow = orch.register(definition(Some("* * * * * *"), true)).await.unwrap();

        scheduler.schedule(&workflow).await.unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();

        let executions = orch.list_executions(&[]).await.unwrap();
        assert!(!executions.is_empty());
        assert!(executions.iter().all(|e| e.trigger == SCHEDULE_TRIGGER));
    }
}
