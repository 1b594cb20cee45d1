use chrono::Utc;
use opsgraph::{
    config::{StateBackend, StateConfig},
    error::AppError,
    graph::{GraphStore, SledGraphStore},
    models::*,
    orchestrator::{AllowList, HttpStepRunner, StepLimits, WorkflowOrchestrator},
    state::{create_stores, AlertStore, ExecutionStore, SledStore, WorkflowStore},
};
use std::sync::Arc;
use tempfile::TempDir;

fn workflow() -> Workflow {
    Workflow::from_definition(
        WorkflowDefinition {
            name: "restart-api".into(),
            description: Some("bounce the api pods".into()),
            steps: vec![
                WorkflowStep::new("drain", "https://ops.internal/drain"),
                {
                    let mut s = WorkflowStep::new("restart", "https://ops.internal/restart");
                    s.depends_on = vec!["drain".into()];
                    s
                },
            ],
            schedule: None,
            enabled: true,
        },
        Utc::now(),
    )
}

#[test]
fn test_sled_backend_requires_path() {
    let err = create_stores(&StateConfig {
        backend: StateBackend::Sled,
        path: None,
        redis_url: None,
    })
    .err()
    .unwrap();
    assert!(matches!(err, AppError::Configuration(_)));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let wf = workflow();
    let alert = Alert::from_input(
        AlertInput::new("disk", Severity::High, "Disk 95% full", "node-3"),
        Utc::now(),
    );

    {
        let state = SledStore::open(dir.path()).unwrap();
        let graph = SledGraphStore::new(state.db()).unwrap();

        graph
            .merge_node(&NodeMerge::new(NodeKey::service("api"), Utc::now()).set("status", "healthy"))
            .await
            .unwrap();
        graph
            .merge_node(&NodeMerge::new(NodeKey::service("db"), Utc::now()))
            .await
            .unwrap();
        graph
            .merge_edge(&EdgeMerge::new(
                NodeKey::service("api"),
                EdgeType::DependsOn,
                NodeKey::service("db"),
                Utc::now(),
            ))
            .await
            .unwrap();

        state.save_workflow(&wf).await.unwrap();
        state.upsert_active(alert.clone()).await.unwrap();
        state.flush().await.unwrap();
    }

    let stores = create_stores(&StateConfig {
        backend: StateBackend::Sled,
        path: Some(dir.path().to_path_buf()),
        redis_url: None,
    })
    .unwrap();

    assert_eq!(stores.graph.stats().await.unwrap().edges, 1);
    let api = stores.graph.get_node(&NodeKey::service("api")).await.unwrap().unwrap();
    assert_eq!(api.properties.get_str("status"), Some("healthy"));

    assert_eq!(stores.workflows.get_workflow(&wf.id).await.unwrap(), Some(wf));

    let active = stores.alerts.get_active(&alert.fingerprint).await.unwrap().unwrap();
    assert_eq!(active.id, alert.id);
}

#[tokio::test]
async fn test_interrupted_executions_fail_after_restart() {
    let dir = TempDir::new().unwrap();
    let wf = workflow();

    let execution_id = {
        let state = SledStore::open(dir.path()).unwrap();
        state.save_workflow(&wf).await.unwrap();

        let mut execution = Execution::new(&wf, "schedule", Utc::now());
        execution.status = ExecutionStatus::Running;
        let drain = execution.step_mut("drain").unwrap();
        drain.status = StepStatus::Running;
        drain.attempts = 1;
        state.save_execution(&execution).await.unwrap();
        state.flush().await.unwrap();
        execution.execution_id
    };

    let state = Arc::new(SledStore::open(dir.path()).unwrap());
    let orch = WorkflowOrchestrator::new(
        state.clone(),
        state.clone(),
        Arc::new(HttpStepRunner::new().unwrap()),
        AllowList::new(["ops.internal"], 443..=443, false),
        StepLimits::default(),
    );

    assert_eq!(orch.recover_interrupted().await.unwrap(), 1);
    assert_eq!(orch.recover_interrupted().await.unwrap(), 0);

    let execution = orch.get_execution(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("interrupted"));
    assert_eq!(execution.step("drain").unwrap().status, StepStatus::Failed);
    assert_eq!(execution.step("restart").unwrap().status, StepStatus::Skipped);
    assert!(execution.completed_at.is_some());
}

#[tokio::test]
async fn test_execution_listing_by_status() {
    let dir = TempDir::new().unwrap();
    let state = SledStore::open(dir.path()).unwrap();
    let wf = workflow();

    let mut done = Execution::new(&wf, "api", Utc::now());
    done.finish(None, Utc::now());
    let pending = Execution::new(&wf, "api", Utc::now());
    state.save_execution(&done).await.unwrap();
    state.save_execution(&pending).await.unwrap();

    assert_eq!(state.list_executions(&[]).await.unwrap().len(), 2);
    let pending_only = state
        .list_executions(&[ExecutionStatus::Pending])
        .await
        .unwrap();
    assert_eq!(pending_only.len(), 1);
    assert_eq!(pending_only[0].execution_id, pending.execution_id);
}
