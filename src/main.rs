use opsgraph::{
    alerts::{create_notifier, create_window, AlertDeduplicator, EscalationEvaluator},
    api::{build_router, AppState},
    config::{Config, SearchBackend},
    graph::GraphProjector,
    ingestion::{EventConsumer, EventPipeline, NatsEventSource},
    orchestrator::{AllowList, HttpStepRunner, StepLimits, WorkflowOrchestrator, WorkflowScheduler},
    rca::RcaSynthesizer,
    search::create_index,
    state::create_stores,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            eprintln!("Using default configuration");
            Config::defaults()?
        }
    };

    init_tracing(&config);

    tracing::info!("Starting Opsgraph v{}", env!("CARGO_PKG_VERSION"));

    if config.observability.prometheus_enabled {
        if let Err(e) = opsgraph::metrics::init_metrics() {
            tracing::warn!(error = %e, "Failed to initialize metrics, continuing without them");
        } else {
            tracing::info!("Prometheus metrics initialized");
        }
    }

    // Storage
    tracing::info!(backend = ?config.state.backend, "Initializing storage backend");
    let stores = create_stores(&config.state)?;

    // Projection and RCA
    let index = create_index(&config.search)?;
    let projector = Arc::new(GraphProjector::new(stores.graph.clone(), index.clone()));
    if config.search.backend == SearchBackend::InProcess {
        let documents = projector.rebuild_index().await?;
        tracing::info!(documents, "Semantic index rebuilt from graph");
    }
    let pipeline = EventPipeline::new(projector);
    let rca = Arc::new(RcaSynthesizer::new(
        stores.graph.clone(),
        index,
        config.rca.clone(),
    ));

    // Alerts
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let window = create_window(&config.alerts, &config.state).await?;
    let notifier = create_notifier(&config.alerts)?;
    let alerts = Arc::new(
        AlertDeduplicator::new(stores.alerts.clone(), window, notifier.clone())
            .with_rules(stores.rules.clone()),
    );
    let escalation = Arc::new(EscalationEvaluator::new(
        stores.alerts.clone(),
        notifier,
        Duration::from_secs(config.alerts.escalation_delay_secs),
    ));
    let escalation_handle = escalation.clone().spawn(
        Duration::from_secs(config.alerts.check_interval_secs),
        shutdown_rx.clone(),
    );
    tracing::info!("Escalation evaluator started");

    // Workflows
    let orchestrator = WorkflowOrchestrator::new(
        stores.workflows.clone(),
        stores.executions.clone(),
        Arc::new(HttpStepRunner::new()?),
        AllowList::from_config(&config.orchestrator),
        StepLimits::from_config(&config.orchestrator),
    );
    let recovered = orchestrator.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Marked interrupted executions as failed");
    }

    let mut app_state = AppState::new(
        pipeline.clone(),
        rca,
        alerts,
        escalation,
        orchestrator.clone(),
    );

    let scheduler = if config.orchestrator.scheduler_enabled {
        let scheduler = Arc::new(WorkflowScheduler::new(orchestrator).await?);
        let scheduled = scheduler.load_all().await?;
        scheduler.start().await?;
        tracing::info!(scheduled, "Workflow scheduler started");
        app_state = app_state.with_scheduler(scheduler.clone());
        Some(scheduler)
    } else {
        None
    };

    // Event bus
    let consumer_handle = if config.messaging.enabled {
        let source = NatsEventSource::connect(&config.messaging).await?;
        let consumer = EventConsumer::new(pipeline, config.messaging.concurrency);
        let mut shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                report = consumer.run(source) => {
                    tracing::warn!(?report, "Event consumer stopped");
                }
                _ = shutdown.changed() => {}
            }
        }))
    } else {
        tracing::info!("Event bus consumer disabled");
        None
    };

    let app = build_router(app_state);
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Metrics: http://{}/metrics", http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(true);
    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler shutdown failed");
        }
    }
    let _ = escalation_handle.await;
    if let Some(handle) = consumer_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("opsgraph={},tower_http=info", config.observability.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
