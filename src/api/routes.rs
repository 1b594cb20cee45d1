use crate::api::{handlers, AppState};
use crate::metrics::middleware::track_metrics;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health & metrics
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Ingestion & graph
        .route("/v1/events", post(handlers::ingest_event))
        .route("/v1/graph/stats", get(handlers::graph_stats))
        .route("/v1/graph/nodes/:key", get(handlers::get_node))
        .route("/v1/index/rebuild", post(handlers::rebuild_index))
        // RCA
        .route("/v1/rca", post(handlers::analyze))
        // Alerts
        .route("/v1/alerts/trigger", post(handlers::trigger_alert))
        .route("/v1/alerts/active", get(handlers::list_active_alerts))
        .route("/v1/alerts/stats", get(handlers::alert_stats))
        .route(
            "/v1/alerts/rules",
            post(handlers::create_alert_rule).get(handlers::list_alert_rules),
        )
        .route("/v1/alerts/escalations/evaluate", post(handlers::evaluate_escalations))
        .route("/v1/alerts/:fingerprint/resolve", post(handlers::resolve_alert))
        // Workflows
        .route("/v1/workflows", post(handlers::create_workflow))
        .route("/v1/workflows", get(handlers::list_workflows))
        .route("/v1/workflows/submit", post(handlers::submit_workflow))
        .route("/v1/workflows/:id", get(handlers::get_workflow))
        .route("/v1/workflows/:id/execute", post(handlers::execute_workflow))
        .route("/v1/executions", get(handlers::list_executions))
        .route("/v1/executions/:id", get(handlers::get_execution))
        .route("/v1/executions/:id/cancel", post(handlers::cancel_execution))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(middleware::from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
