//! Prometheus metrics for the opsgraph engine.
//!
//! All metrics live in one registry under the `opsgraph` namespace and are
//! exported in text format by `GET /metrics`.
//!
//! ```no_run
//! use opsgraph::metrics::{self, ALERTS_TOTAL};
//!
//! metrics::init_metrics().unwrap();
//! ALERTS_TOTAL.with_label_values(&["triggered", "high"]).inc();
//! print!("{}", metrics::gather_metrics());
//! ```

pub mod middleware;

use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::{
    CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};

const NAMESPACE: &str = "opsgraph";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Ingestion & Projection Metrics
    // ============================================================================

    /// Labels: kind, outcome (applied, noop, failed)
    pub static ref EVENTS_PROJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("events_projected_total", "Events run through the graph projector")
            .namespace(NAMESPACE),
        &["kind", "outcome"]
    ).expect("Failed to create EVENTS_PROJECTED_TOTAL metric");

    /// Labels: field
    pub static ref EVENTS_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("events_rejected_total", "Envelopes rejected by the codec").namespace(NAMESPACE),
        &["field"]
    ).expect("Failed to create EVENTS_REJECTED_TOTAL metric");

    /// Labels: entity (node, edge), outcome (created, updated, unchanged)
    pub static ref GRAPH_MERGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("graph_merges_total", "Node and edge merges by outcome").namespace(NAMESPACE),
        &["entity", "outcome"]
    ).expect("Failed to create GRAPH_MERGES_TOTAL metric");

    /// Labels: operation (index, search, rebuild)
    pub static ref INDEX_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("index_failures_total", "Semantic index operations that failed")
            .namespace(NAMESPACE),
        &["operation"]
    ).expect("Failed to create INDEX_FAILURES_TOTAL metric");

    /// Labels: kind
    pub static ref PROJECTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("projection_duration_seconds", "Time to project one event")
            .namespace(NAMESPACE)
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["kind"]
    ).expect("Failed to create PROJECTION_DURATION_SECONDS metric");

    // ============================================================================
    // RCA Metrics
    // ============================================================================

    /// Labels: evidence (semantic, keyword_fallback)
    pub static ref RCA_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("rca_requests_total", "RCA analyses by evidence path").namespace(NAMESPACE),
        &["evidence"]
    ).expect("Failed to create RCA_REQUESTS_TOTAL metric");

    pub static ref RCA_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("rca_duration_seconds", "RCA analysis duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create RCA_DURATION_SECONDS metric");

    pub static ref RCA_CONFIDENCE: Histogram = Histogram::with_opts(
        HistogramOpts::new("rca_confidence", "Confidence of RCA answers")
            .namespace(NAMESPACE)
            .buckets(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0])
    ).expect("Failed to create RCA_CONFIDENCE metric");

    // ============================================================================
    // Alert Metrics
    // ============================================================================

    /// Labels: outcome (triggered, deduplicated), severity
    pub static ref ALERTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("alerts_total", "Alert triggers by outcome").namespace(NAMESPACE),
        &["outcome", "severity"]
    ).expect("Failed to create ALERTS_TOTAL metric");

    /// Labels: severity
    pub static ref ALERTS_ESCALATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("alerts_escalated_total", "Alerts escalated").namespace(NAMESPACE),
        &["severity"]
    ).expect("Failed to create ALERTS_ESCALATED_TOTAL metric");

    pub static ref ALERTS_ACTIVE: Gauge = Gauge::with_opts(
        Opts::new("alerts_active", "Alerts currently active").namespace(NAMESPACE)
    ).expect("Failed to create ALERTS_ACTIVE metric");

    /// Labels: kind (new, escalation), status (sent, failed)
    pub static ref NOTIFICATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("notifications_total", "Alert notifications sent").namespace(NAMESPACE),
        &["kind", "status"]
    ).expect("Failed to create NOTIFICATIONS_TOTAL metric");

    // ============================================================================
    // Workflow Metrics
    // ============================================================================

    /// Labels: status (completed, failed)
    pub static ref WORKFLOW_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("workflow_executions_total", "Finished workflow executions").namespace(NAMESPACE),
        &["status"]
    ).expect("Failed to create WORKFLOW_EXECUTIONS_TOTAL metric");

    pub static ref WORKFLOW_EXECUTIONS_ACTIVE: Gauge = Gauge::with_opts(
        Opts::new("workflow_executions_active", "Workflow executions in flight").namespace(NAMESPACE)
    ).expect("Failed to create WORKFLOW_EXECUTIONS_ACTIVE metric");

    /// Labels: outcome (success, transient, terminal)
    pub static ref WORKFLOW_STEP_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("workflow_step_attempts_total", "Step HTTP attempts by outcome")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create WORKFLOW_STEP_ATTEMPTS_TOTAL metric");

    pub static ref WORKFLOW_STEP_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("workflow_step_duration_seconds", "Step duration including retries")
            .namespace(NAMESPACE)
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0])
    ).expect("Failed to create WORKFLOW_STEP_DURATION_SECONDS metric");

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Build information").namespace(NAMESPACE),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");
}

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Register every metric with the global registry; later calls are no-ops
pub fn init_metrics() -> Result<(), prometheus::Error> {
    INITIALIZED.get_or_try_init(register_all).map(|_| ())
}

fn register_all() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(EVENTS_PROJECTED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(EVENTS_REJECTED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(GRAPH_MERGES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(INDEX_FAILURES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PROJECTION_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(RCA_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(RCA_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(RCA_CONFIDENCE.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(ALERTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ALERTS_ESCALATED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ALERTS_ACTIVE.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(NOTIFICATIONS_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(WORKFLOW_EXECUTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(WORKFLOW_EXECUTIONS_ACTIVE.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(WORKFLOW_STEP_ATTEMPTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(WORKFLOW_STEP_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(BUILD_INFO.clone()))?;
    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Prometheus text exposition of the global registry
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
