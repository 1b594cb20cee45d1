use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Workflow as submitted by a client, before registration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkflowDefinition {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[validate(length(min = 1), nested)]
    pub steps: Vec<WorkflowStep>,

    /// Cron expression (six fields, seconds first)
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Registered workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub schedule: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn from_definition(definition: WorkflowDefinition, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: definition.name,
            description: definition.description,
            steps: definition.steps,
            schedule: definition.schedule,
            enabled: definition.enabled,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WorkflowStep {
    #[validate(length(min = 1, max = 100))]
    pub step_id: String,

    /// Free-form label for what the step does
    #[serde(default)]
    pub action: Option<String>,

    #[validate(length(min = 1))]
    pub service_url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub payload: Value,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default = "default_step_timeout", alias = "timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl WorkflowStep {
    pub fn new(step_id: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            action: None,
            service_url: service_url.into(),
            method: HttpMethod::default(),
            payload: Value::Null,
            depends_on: Vec::new(),
            timeout_secs: default_step_timeout(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffStrategy,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Body of a 2xx response that was not JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            attempts: 0,
            output: None,
            error: None,
            raw_body: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Entry of the aggregated execution result
    pub fn summary(&self) -> Value {
        let mut entry = json!({
            "status": self.status,
            "attempts": self.attempts,
        });
        if let Some(output) = &self.output {
            entry["output"] = output.clone();
        }
        if let Some(error) = &self.error {
            entry["error"] = json!(error);
        }
        if let Some(raw) = &self.raw_body {
            entry["raw_body"] = json!(raw);
        }
        entry
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger: String,
    pub status: ExecutionStatus,
    /// One record per step, in definition order
    pub steps: Vec<StepRecord>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(workflow: &Workflow, trigger: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            workflow_id: workflow.id,
            trigger: trigger.into(),
            status: ExecutionStatus::Pending,
            steps: workflow
                .steps
                .iter()
                .map(|s| StepRecord::pending(&s.step_id))
                .collect(),
            result: None,
            error: None,
            started_at: now,
            completed_at: None,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// `"<completed>/<total>"`
    pub fn progress(&self) -> String {
        format!("{}/{}", self.completed_steps(), self.steps.len())
    }

    /// JSON object keyed by step id
    pub fn aggregate_result(&self) -> Value {
        let map: Map<String, Value> = self
            .steps
            .iter()
            .map(|s| (s.step_id.clone(), s.summary()))
            .collect();
        Value::Object(map)
    }

    pub fn all_completed(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    /// Close the execution, deriving its status from the step records
    pub fn finish(&mut self, error: Option<String>, now: DateTime<Utc>) {
        self.result = Some(self.aggregate_result());
        self.status = if error.is_none() && self.all_completed() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.error = match error {
            Some(e) => Some(e),
            None if self.status == ExecutionStatus::Failed => {
                let failed: Vec<&str> = self
                    .steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Failed)
                    .map(|s| s.step_id.as_str())
                    .collect();
                Some(format!("steps failed: {}", failed.join(", ")))
            }
            None => None,
        };
        self.completed_at = Some(now);
    }

    pub fn status_view(&self) -> ExecutionStatusView {
        ExecutionStatusView {
            execution_id: self.execution_id,
            workflow_id: self.workflow_id,
            trigger: self.trigger.clone(),
            status: self.status,
            progress: self.progress(),
            steps: self.steps.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatusView {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger: String,
    pub status: ExecutionStatus,
    pub progress: String,
    pub steps: Vec<StepRecord>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn default_step_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow::from_definition(
            WorkflowDefinition {
                name: "deploy".into(),
                description: None,
                steps,
                schedule: None,
                enabled: true,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_step_defaults_from_json() {
        let step: WorkflowStep = serde_json::from_str(
            r#"{"step_id":"build","service_url":"http://ci:8001/build","payload":{}}"#,
        )
        .unwrap();
        assert_eq!(step.method, HttpMethod::Post);
        assert_eq!(step.timeout_secs, 30);
        assert_eq!(step.retry_policy.max_attempts, 3);
        assert_eq!(step.retry_policy.backoff, BackoffStrategy::Exponential);
        assert!(step.depends_on.is_empty());
    }

    #[test]
    fn test_legacy_timeout_field() {
        let step: WorkflowStep = serde_json::from_str(
            r#"{"step_id":"s","service_url":"http://a:8000","method":"GET","timeout":5}"#,
        )
        .unwrap();
        assert_eq!(step.timeout_secs, 5);
        assert_eq!(step.method, HttpMethod::Get);
    }

    #[test]
    fn test_definition_requires_steps() {
        let def = WorkflowDefinition {
            name: "empty".into(),
            description: None,
            steps: vec![],
            schedule: None,
            enabled: true,
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_progress_counts_completed() {
        let wf = workflow(vec![
            WorkflowStep::new("a", "http://x:8000"),
            WorkflowStep::new("b", "http://x:8000").depends_on("a"),
        ]);
        let mut exec = Execution::new(&wf, "manual", Utc::now());
        assert_eq!(exec.progress(), "0/2");

        exec.step_mut("a").unwrap().status = StepStatus::Completed;
        assert_eq!(exec.progress(), "1/2");
    }

    #[test]
    fn test_finish_aggregates_by_step_id() {
        let wf = workflow(vec![
            WorkflowStep::new("a", "http://x:8000"),
            WorkflowStep::new("b", "http://x:8000").depends_on("a"),
        ]);
        let mut exec = Execution::new(&wf, "manual", Utc::now());
        {
            let a = exec.step_mut("a").unwrap();
            a.status = StepStatus::Completed;
            a.attempts = 1;
            a.output = Some(json!({"ok": true}));
        }
        {
            let b = exec.step_mut("b").unwrap();
            b.status = StepStatus::Failed;
            b.attempts = 3;
            b.error = Some("HTTP 503".into());
        }

        exec.finish(None, Utc::now());

        assert_eq!(exec.status, ExecutionStatus::Failed);
        let result = exec.result.unwrap();
        assert_eq!(result["a"]["output"]["ok"], json!(true));
        assert_eq!(result["b"]["status"], json!("failed"));
        assert_eq!(result["b"]["attempts"], json!(3));
        assert_eq!(exec.error.as_deref(), Some("steps failed: b"));
    }

    #[test]
    fn test_finish_all_completed() {
        let wf = workflow(vec![WorkflowStep::new("only", "http://x:8000")]);
        let mut exec = Execution::new(&wf, "manual", Utc::now());
        exec.step_mut("only").unwrap().status = StepStatus::Completed;
        exec.finish(None, Utc::now());
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.error.is_none());
    }
}
