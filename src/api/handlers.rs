use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::graph::{GraphStats, ProjectionResult};
use crate::metrics;
use crate::models::*;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let graph = state.graph().stats().await;
    Json(HealthResponse {
        status: if graph.is_ok() { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        graph: graph.ok(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphStats>,
}

/// Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

/// Decode an envelope and project it into the graph.
///
/// The body is taken raw so malformed JSON is reported as a schema error.
pub async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ProjectionResult>> {
    Ok(Json(state.pipeline.handle(&body).await?))
}

pub async fn graph_stats(State(state): State<AppState>) -> Result<Json<GraphStats>> {
    Ok(Json(state.graph().stats().await?))
}

/// Node by `label:key`
pub async fn get_node(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Node>> {
    let key: NodeKey = key.parse()?;
    let node = state
        .graph()
        .get_node(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Node {} not found", key)))?;
    Ok(Json(node))
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub documents: usize,
}

pub async fn rebuild_index(State(state): State<AppState>) -> Result<Json<RebuildResponse>> {
    let documents = state.pipeline.projector().rebuild_index().await?;
    Ok(Json(RebuildResponse { documents }))
}

pub async fn analyze(
    State(state): State<AppState>,
    Json(query): Json<RcaQuery>,
) -> Result<Json<RcaResult>> {
    Ok(Json(state.rca.analyze(&query).await?))
}

/// 201 when a new alert was created, 200 when deduplicated
pub async fn trigger_alert(
    State(state): State<AppState>,
    Json(input): Json<AlertInput>,
) -> Result<(StatusCode, Json<TriggerOutcome>)> {
    let outcome = state.alerts.trigger(input).await?;
    let status = if outcome.triggered {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

fn default_alert_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct ActiveAlertsQuery {
    pub severity: Option<Severity>,
    #[serde(default = "default_alert_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

pub async fn list_active_alerts(
    State(state): State<AppState>,
    Query(query): Query<ActiveAlertsQuery>,
) -> Result<Json<AlertListResponse>> {
    let alerts = state.alerts.list_active(query.severity, query.limit).await?;
    Ok(Json(AlertListResponse {
        count: alerts.len(),
        alerts,
    }))
}

#[derive(Debug, Serialize)]
pub struct RuleSaved {
    pub rule_id: Uuid,
    pub name: String,
    pub created: bool,
}

/// 201 when the rule is new, 200 when a rule of that name was replaced
pub async fn create_alert_rule(
    State(state): State<AppState>,
    Json(rule): Json<AlertRule>,
) -> Result<(StatusCode, Json<RuleSaved>)> {
    let (rule, created) = state.alerts.save_rule(rule).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RuleSaved {
            rule_id: rule.id,
            name: rule.name,
            created,
        }),
    ))
}

pub async fn list_alert_rules(State(state): State<AppState>) -> Result<Json<Vec<AlertRule>>> {
    Ok(Json(state.alerts.list_rules().await?))
}

pub async fn alert_stats(State(state): State<AppState>) -> Result<Json<AlertStats>> {
    Ok(Json(state.alerts.stats().await?))
}

pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<Json<Alert>> {
    Ok(Json(state.alerts.resolve(&fingerprint).await?))
}

pub async fn evaluate_escalations(
    State(state): State<AppState>,
) -> Result<Json<AlertListResponse>> {
    let alerts = state.escalation.evaluate(Utc::now()).await?;
    Ok(Json(AlertListResponse {
        count: alerts.len(),
        alerts,
    }))
}

#[derive(Debug, Serialize)]
pub struct WorkflowCreated {
    pub workflow_id: Uuid,
    pub scheduled: bool,
}

pub async fn create_workflow(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<WorkflowCreated>)> {
    let workflow = state.orchestrator.register(definition).await?;
    let scheduled = schedule(&state, &workflow).await?;
    Ok((
        StatusCode::CREATED,
        Json(WorkflowCreated {
            workflow_id: workflow.id,
            scheduled,
        }),
    ))
}

async fn schedule(state: &AppState, workflow: &Workflow) -> Result<bool> {
    match &state.scheduler {
        Some(scheduler) => scheduler.schedule(workflow).await,
        None => Ok(false),
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkflowListQuery {
    pub enabled: Option<bool>,
}

pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowListQuery>,
) -> Result<Json<Vec<Workflow>>> {
    let mut workflows = state.orchestrator.list_workflows().await?;
    if let Some(enabled) = query.enabled {
        workflows.retain(|w| w.enabled == enabled);
    }
    Ok(Json(workflows))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>> {
    Ok(Json(state.orchestrator.get_workflow(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub trigger: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionAccepted {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    pub execution_id: Uuid,
}

pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<ExecuteRequest>>,
) -> Result<(StatusCode, Json<ExecutionAccepted>)> {
    let trigger = request
        .and_then(|Json(r)| r.trigger)
        .unwrap_or_else(|| "api".to_string());
    let execution_id = state.orchestrator.submit(id, &trigger).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExecutionAccepted {
            workflow_id: None,
            execution_id,
        }),
    ))
}

/// Register and execute in one call
pub async fn submit_workflow(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<ExecutionAccepted>)> {
    let (workflow, execution_id) = state.orchestrator.submit_definition(definition, "api").await?;
    schedule(&state, &workflow).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExecutionAccepted {
            workflow_id: Some(workflow.id),
            execution_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    /// Comma-separated statuses
    pub status: Option<String>,
}

pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Vec<ExecutionStatusView>>> {
    let statuses = query
        .status
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ExecutionStatus>()
                .map_err(|_| AppError::Validation(format!("unknown execution status '{}'", s)))
        })
        .collect::<Result<Vec<_>>>()?;

    let executions = state.orchestrator.list_executions(&statuses).await?;
    Ok(Json(executions.iter().map(Execution::status_view).collect()))
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionStatusView>> {
    Ok(Json(state.orchestrator.status(id).await?))
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ExecutionStatusView>)> {
    let view = state.orchestrator.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}
