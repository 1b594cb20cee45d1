use crate::config::OrchestratorConfig;
use crate::error::{AppError, Result};
use crate::metrics::{
    WORKFLOW_EXECUTIONS_ACTIVE, WORKFLOW_EXECUTIONS_TOTAL, WORKFLOW_STEP_ATTEMPTS_TOTAL,
    WORKFLOW_STEP_DURATION_SECONDS,
};
use crate::models::{
    Execution, ExecutionStatus, ExecutionStatusView, StepStatus, Workflow, WorkflowDefinition,
    WorkflowStep,
};
use crate::orchestrator::allowlist::AllowList;
use crate::orchestrator::dag::ExecutionPlan;
use crate::orchestrator::retry::backoff_delay;
use crate::orchestrator::runner::{StepOutcome, StepRunner};
use crate::orchestrator::scheduler::validate_schedule;
use crate::state::{ExecutionStore, WorkflowStore};
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

pub const CANCELLED: &str = "execution cancelled";
pub const INTERRUPTED: &str = "interrupted";

/// Upper bounds applied to every step
#[derive(Debug, Clone, Copy)]
pub struct StepLimits {
    pub max_timeout: Duration,
    pub max_attempts: u32,
}

impl StepLimits {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_timeout: Duration::from_secs(config.max_step_timeout_secs.max(1)),
            max_attempts: config.max_step_attempts.max(1),
        }
    }
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            max_timeout: Duration::from_secs(600),
            max_attempts: 10,
        }
    }
}

/// What one step ended with, after all its attempts
#[derive(Debug)]
struct StepResult {
    step_id: String,
    status: StepStatus,
    attempts: u32,
    output: Option<Value>,
    error: Option<String>,
    raw_body: Option<String>,
}

/// Runs workflows as dependency-driven DAGs of HTTP steps
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    runner: Arc<dyn StepRunner>,
    allow_list: Arc<AllowList>,
    limits: StepLimits,
    cancels: Arc<DashMap<Uuid, watch::Sender<bool>>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        runner: Arc<dyn StepRunner>,
        allow_list: AllowList,
        limits: StepLimits,
    ) -> Self {
        Self {
            workflows,
            executions,
            runner,
            allow_list: Arc::new(allow_list),
            limits,
            cancels: Arc::new(DashMap::new()),
        }
    }

    /// Validate and store a definition. Rejected definitions never run.
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<Workflow> {
        definition.validate()?;
        let plan = ExecutionPlan::build(&definition.steps)?;

        for step in &definition.steps {
            self.allow_list.check(&step.service_url)?;
            self.check_limits(step)?;
        }
        if let Some(expr) = &definition.schedule {
            validate_schedule(expr)?;
        }

        let workflow = Workflow::from_definition(definition, Utc::now());
        self.workflows.save_workflow(&workflow).await?;

        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = plan.len(),
            schedule = ?workflow.schedule,
            "Workflow registered"
        );
        Ok(workflow)
    }

    fn check_limits(&self, step: &WorkflowStep) -> Result<()> {
        if step.timeout_secs == 0 || step.timeout_secs > self.limits.max_timeout.as_secs() {
            return Err(AppError::Validation(format!(
                "step '{}': timeout_secs must be between 1 and {}",
                step.step_id,
                self.limits.max_timeout.as_secs()
            )));
        }
        let attempts = step.retry_policy.max_attempts;
        if attempts == 0 || attempts > self.limits.max_attempts {
            return Err(AppError::Validation(format!(
                "step '{}': retry_policy.max_attempts must be between 1 and {}",
                step.step_id, self.limits.max_attempts
            )));
        }
        Ok(())
    }

    /// Start an execution in the background; returns its id
    pub async fn submit(&self, workflow_id: Uuid, trigger: &str) -> Result<Uuid> {
        let (workflow, plan, execution, cancel) = self.prepare(workflow_id, trigger).await?;
        let execution_id = execution.execution_id;

        let this = self.clone();
        tokio::spawn(async move {
            this.drive(workflow, plan, execution, cancel).await;
        });

        Ok(execution_id)
    }

    /// Run an execution to completion on the caller's task
    pub async fn execute(&self, workflow_id: Uuid, trigger: &str) -> Result<Execution> {
        let (workflow, plan, execution, cancel) = self.prepare(workflow_id, trigger).await?;
        Ok(self.drive(workflow, plan, execution, cancel).await)
    }

    /// Register then submit
    pub async fn submit_definition(
        &self,
        definition: WorkflowDefinition,
        trigger: &str,
    ) -> Result<(Workflow, Uuid)> {
        let workflow = self.register(definition).await?;
        let execution_id = self.submit(workflow.id, trigger).await?;
        Ok((workflow, execution_id))
    }

    async fn prepare(
        &self,
        workflow_id: Uuid,
        trigger: &str,
    ) -> Result<(Workflow, ExecutionPlan, Execution, watch::Receiver<bool>)> {
        let workflow = self
            .workflows
            .get_workflow(&workflow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Workflow {} not found", workflow_id)))?;
        let plan = ExecutionPlan::build(&workflow.steps)?;

        let execution = Execution::new(&workflow, trigger, Utc::now());
        self.executions.save_execution(&execution).await?;

        let (sender, receiver) = watch::channel(false);
        self.cancels.insert(execution.execution_id, sender);

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.execution_id,
            trigger = %trigger,
            "Workflow execution submitted"
        );
        Ok((workflow, plan, execution, receiver))
    }

    /// Stop starting steps and retrying; in-flight attempts finish
    pub async fn cancel(&self, execution_id: Uuid) -> Result<ExecutionStatusView> {
        let execution = self.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Execution {} already {}",
                execution_id, execution.status
            )));
        }

        match self.cancels.get(&execution_id) {
            Some(sender) => {
                sender.send_replace(true);
            }
            None => {
                return Err(AppError::Conflict(format!(
                    "Execution {} is not running on this instance",
                    execution_id
                )))
            }
        }

        info!(execution_id = %execution_id, "Workflow execution cancellation requested");
        Ok(execution.status_view())
    }

    pub async fn status(&self, execution_id: Uuid) -> Result<ExecutionStatusView> {
        Ok(self.get_execution(execution_id).await?.status_view())
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        self.executions
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", execution_id)))
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.workflows
            .get_workflow(&workflow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Workflow {} not found", workflow_id)))
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.workflows.list_workflows().await
    }

    pub async fn list_executions(&self, statuses: &[ExecutionStatus]) -> Result<Vec<Execution>> {
        self.executions.list_executions(statuses).await
    }

    /// Poll until the execution reaches a terminal status
    pub async fn wait(&self, execution_id: Uuid, timeout: Duration) -> Result<Execution> {
        let deadline = Instant::now() + timeout;
        loop {
            let execution = self.get_execution(execution_id).await?;
            if execution.status.is_terminal() {
                return Ok(execution);
            }
            if Instant::now() >= deadline {
                return Err(AppError::Timeout(format!(
                    "Execution {} still {} after {:?}",
                    execution_id, execution.status, timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Fail executions left pending or running by a previous process
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let stale = self
            .executions
            .list_executions(&[ExecutionStatus::Pending, ExecutionStatus::Running])
            .await?;

        let mut recovered = 0;
        for mut execution in stale {
            if self.cancels.contains_key(&execution.execution_id) {
                continue;
            }
            let now = Utc::now();
            for step in &mut execution.steps {
                let status = match step.status {
                    StepStatus::Running => StepStatus::Failed,
                    StepStatus::Pending => StepStatus::Skipped,
                    _ => continue,
                };
                step.status = status;
                step.error = Some(INTERRUPTED.to_string());
                step.completed_at = Some(now);
            }
            execution.finish(Some(INTERRUPTED.to_string()), now);
            self.executions.save_execution(&execution).await?;
            warn!(
                execution_id = %execution.execution_id,
                workflow_id = %execution.workflow_id,
                "Marked interrupted execution as failed"
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn persist(&self, execution: &Execution) {
        if let Err(e) = self.executions.save_execution(execution).await {
            error!(execution_id = %execution.execution_id, error = %e, "Failed to persist execution");
        }
    }

    async fn drive(
        &self,
        workflow: Workflow,
        plan: ExecutionPlan,
        mut execution: Execution,
        mut cancel: watch::Receiver<bool>,
    ) -> Execution {
        let execution_id = execution.execution_id;
        execution.status = ExecutionStatus::Running;
        self.persist(&execution).await;
        WORKFLOW_EXECUTIONS_ACTIVE.inc();

        let steps: HashMap<&str, &WorkflowStep> = workflow
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), s))
            .collect();
        let mut waiting: HashMap<String, usize> = plan
            .order()
            .iter()
            .map(|id| (id.clone(), plan.dependencies(id).len()))
            .collect();
        let mut ready: VecDeque<String> = plan.roots().into();
        let mut in_flight = FuturesUnordered::new();
        let mut cancelled = *cancel.borrow();
        let mut cancel_open = true;

        loop {
            if cancelled {
                ready.clear();
                skip_pending(&mut execution, CANCELLED);
            }

            let mut dispatched = false;
            while let Some(step_id) = ready.pop_front() {
                let Some(step) = steps.get(step_id.as_str()) else {
                    continue;
                };
                if let Some(record) = execution.step_mut(&step_id) {
                    record.status = StepStatus::Running;
                    record.started_at = Some(Utc::now());
                }
                in_flight.push(self.run_step((*step).clone(), cancel.clone()));
                dispatched = true;
            }
            if dispatched || cancelled {
                self.persist(&execution).await;
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(result) = in_flight.next() => {
                    apply_result(&plan, &mut execution, &mut waiting, &mut ready, result, cancelled);
                    self.persist(&execution).await;
                }
                changed = cancel.changed(), if cancel_open && !cancelled => {
                    match changed {
                        Ok(()) => cancelled = *cancel.borrow(),
                        Err(_) => cancel_open = false,
                    }
                }
                else => break,
            }
        }

        let error = cancelled.then(|| CANCELLED.to_string());
        execution.finish(error, Utc::now());
        self.persist(&execution).await;
        self.cancels.remove(&execution_id);

        WORKFLOW_EXECUTIONS_ACTIVE.dec();
        WORKFLOW_EXECUTIONS_TOTAL
            .with_label_values(&[execution.status.to_string().as_str()])
            .inc();
        info!(
            execution_id = %execution_id,
            workflow_id = %execution.workflow_id,
            status = %execution.status,
            progress = %execution.progress(),
            error = ?execution.error,
            "Workflow execution finished"
        );

        execution
    }

    async fn run_step(&self, step: WorkflowStep, mut cancel: watch::Receiver<bool>) -> StepResult {
        let started = Instant::now();
        let timeout = Duration::from_secs(step.timeout_secs.max(1)).min(self.limits.max_timeout);
        let max_attempts = step
            .retry_policy
            .max_attempts
            .min(self.limits.max_attempts)
            .max(1);

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            // Re-checked per attempt: the allow-list may have changed since registration
            let outcome = match self.allow_list.check(&step.service_url) {
                Ok(url) => self.runner.run(&step, &url, timeout).await,
                Err(e) => StepOutcome::Terminal {
                    error: e.to_string(),
                    raw_body: None,
                },
            };
            WORKFLOW_STEP_ATTEMPTS_TOTAL
                .with_label_values(&[outcome.label()])
                .inc();

            let StepOutcome::Transient { error } = &outcome else {
                break outcome;
            };
            if attempts >= max_attempts || *cancel.borrow() {
                break outcome;
            }

            let delay = backoff_delay(&step.retry_policy, attempts);
            warn!(
                step_id = %step.step_id,
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Step attempt failed, retrying"
            );
            if sleep_unless_cancelled(delay, &mut cancel).await {
                break outcome;
            }
        };

        WORKFLOW_STEP_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        let mut result = StepResult {
            step_id: step.step_id,
            status: StepStatus::Failed,
            attempts,
            output: None,
            error: None,
            raw_body: None,
        };
        match outcome {
            StepOutcome::Success { output } => {
                result.status = StepStatus::Completed;
                result.output = (!output.is_null()).then_some(output);
            }
            StepOutcome::Terminal { error, raw_body } => {
                result.error = Some(AppError::TerminalStep(error).to_string());
                result.raw_body = raw_body;
            }
            StepOutcome::Transient { error } => {
                result.error = Some(
                    AppError::TerminalStep(format!("{} (after {} attempts)", error, attempts))
                        .to_string(),
                );
            }
        }
        result
    }
}

/// Returns true if cancellation arrived before the delay elapsed
async fn sleep_unless_cancelled(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

fn skip_pending(execution: &mut Execution, reason: &str) {
    let now = Utc::now();
    for record in execution
        .steps
        .iter_mut()
        .filter(|s| s.status == StepStatus::Pending)
    {
        record.status = StepStatus::Skipped;
        record.error = Some(reason.to_string());
        record.completed_at = Some(now);
    }
}

fn apply_result(
    plan: &ExecutionPlan,
    execution: &mut Execution,
    waiting: &mut HashMap<String, usize>,
    ready: &mut VecDeque<String>,
    result: StepResult,
    cancelled: bool,
) {
    let now = Utc::now();
    let step_id = result.step_id.clone();

    if let Some(record) = execution.step_mut(&step_id) {
        record.status = result.status;
        record.attempts = result.attempts;
        record.output = result.output;
        record.error = result.error;
        record.raw_body = result.raw_body;
        record.completed_at = Some(now);
    }

    match result.status {
        StepStatus::Completed => {
            info!(step_id = %step_id, attempts = result.attempts, "Step completed");
            for dependent in plan.dependents(&step_id) {
                let Some(count) = waiting.get_mut(dependent) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                let pending = execution
                    .step(dependent)
                    .map(|r| r.status == StepStatus::Pending)
                    .unwrap_or(false);
                if *count == 0 && pending && !cancelled {
                    ready.push_back(dependent.clone());
                }
            }
        }
        _ => {
            warn!(step_id = %step_id, attempts = result.attempts, "Step failed, skipping dependents");
            let reason = format!("dependency '{}' failed", step_id);
            for dependent in plan.transitive_dependents(&step_id) {
                if let Some(record) = execution.step_mut(&dependent) {
                    if record.status == StepStatus::Pending {
                        record.status = StepStatus::Skipped;
                        record.error = Some(reason.clone());
                        record.completed_at = Some(now);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::Url;
    use serde_json::json;

    /// Scripted runner: outcomes per step id, consumed in order
    #[derive(Default)]
    struct ScriptedRunner {
        script: Mutex<HashMap<String, VecDeque<StepOutcome>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn on(self, step_id: &str, outcomes: Vec<StepOutcome>) -> Self {
            self.script.lock().insert(step_id.to_string(), outcomes.into());
            self
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run(&self, step: &WorkflowStep, _url: &Url, _timeout: Duration) -> StepOutcome {
            self.calls.lock().push(step.step_id.clone());
            self.script
                .lock()
                .get_mut(&step.step_id)
                .and_then(|q| q.pop_front())
                .unwrap_or(StepOutcome::Success { output: json!({"step": step.step_id}) })
        }
    }

    fn orchestrator(runner: Arc<ScriptedRunner>) -> WorkflowOrchestrator {
        let store = Arc::new(InMemoryStore::new());
        WorkflowOrchestrator::new(
            store.clone(),
            store,
            runner,
            AllowList::new(["svc"], 8000..=8015, true),
            StepLimits::default(),
        )
    }

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        let mut step = deps.iter().fold(
            WorkflowStep::new(id, format!("http://svc:8001/{}", id)),
            |s, d| s.depends_on(*d),
        );
        step.retry_policy.base_delay_ms = 1;
        step
    }

    fn definition(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "remediate".into(),
            description: None,
            steps,
            schedule: None,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_failed_step_skips_dependents() {
        let transient = || StepOutcome::Transient { error: "HTTP 503".into() };
        let runner = Arc::new(ScriptedRunner::default().on("two", vec![transient(), transient(), transient()]));
        let orch = orchestrator(runner.clone());

        let workflow = orch
            .register(definition(vec![step("one", &[]), step("two", &["one"]), step("three", &["two"])]))
            .await
            .unwrap();
        let execution = orch.execute(workflow.id, "manual").await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.step("one").unwrap().status, StepStatus::Completed);
        assert_eq!(execution.step("two").unwrap().status, StepStatus::Failed);
        assert_eq!(execution.step("two").unwrap().attempts, 3);
        assert_eq!(execution.step("three").unwrap().status, StepStatus::Skipped);
        assert_eq!(execution.progress(), "1/3");

        let result = execution.result.unwrap();
        assert_eq!(result["one"]["status"], "completed");
        assert_eq!(result["two"]["status"], "failed");
        assert!(!runner.calls.lock().contains(&"three".to_string()));
    }

    #[tokio::test]
    async fn test_terminal_outcome_is_not_retried() {
        let runner = Arc::new(ScriptedRunner::default().on(
            "one",
            vec![StepOutcome::Terminal { error: "HTTP 404".into(), raw_body: None }],
        ));
        let orch = orchestrator(runner.clone());
        let workflow = orch.register(definition(vec![step("one", &[])])).await.unwrap();

        let execution = orch.execute(workflow.id, "manual").await.unwrap();
        assert_eq!(execution.step("one").unwrap().attempts, 1);
        assert_eq!(runner.calls.lock().len(), 1);
        assert_eq!(execution.error.as_deref(), Some("steps failed: one"));
    }

    #[tokio::test]
    async fn test_independent_branch_continues() {
        let runner = Arc::new(ScriptedRunner::default().on(
            "bad",
            vec![StepOutcome::Terminal { error: "HTTP 400".into(), raw_body: None }],
        ));
        let orch = orchestrator(runner);
        let workflow = orch
            .register(definition(vec![
                step("bad", &[]),
                step("after_bad", &["bad"]),
                step("good", &[]),
                step("after_good", &["good"]),
            ]))
            .await
            .unwrap();

        let execution = orch.execute(workflow.id, "manual").await.unwrap();
        assert_eq!(execution.step("after_bad").unwrap().status, StepStatus::Skipped);
        assert_eq!(execution.step("after_good").unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_register_rejects_disallowed_urls_and_limits() {
        let orch = orchestrator(Arc::new(ScriptedRunner::default()));

        let mut bad_host = step("one", &[]);
        bad_host.service_url = "http://metadata.internal:8001/".into();
        assert!(matches!(
            orch.register(definition(vec![bad_host])).await,
            Err(AppError::Validation(_))
        ));

        let mut slow = step("one", &[]);
        slow.timeout_secs = 10_000;
        assert!(orch.register(definition(vec![slow])).await.is_err());

        assert!(orch.list_workflows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let store = Arc::new(InMemoryStore::new());
        let orch = WorkflowOrchestrator::new(
            store.clone(),
            store.clone(),
            Arc::new(ScriptedRunner::default()),
            AllowList::new(["svc"], 8000..=8015, true),
            StepLimits::default(),
        );
        let workflow = orch
            .register(definition(vec![step("one", &[]), step("two", &["one"])]))
            .await
            .unwrap();

        let mut stale = Execution::new(&workflow, "manual", Utc::now());
        stale.status = ExecutionStatus::Running;
        stale.steps[0].status = StepStatus::Running;
        store.save_execution(&stale).await.unwrap();

        assert_eq!(orch.recover_interrupted().await.unwrap(), 1);
        let recovered = orch.get_execution(stale.execution_id).await.unwrap();
        assert_eq!(recovered.status, ExecutionStatus::Failed);
        assert_eq!(recovered.error.as_deref(), Some(INTERRUPTED));
        assert_eq!(recovered.steps[0].status, StepStatus::Failed);
        assert_eq!(recovered.steps[1].status, StepStatus::Skipped);
    }
}
