use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use opsgraph::{
    config::RcaConfig,
    error::{AppError, Result},
    graph::{GraphProjector, GraphStats, GraphStore, InMemoryGraphStore},
    ingestion::EventPipeline,
    models::*,
    rca::RcaSynthesizer,
    search::{
        IndexedDocument, ScoredDocument, SearchError, SearchFilter, SearchResult, SemanticIndex,
        VectorIndex,
    },
};
use serde_json::json;
use std::sync::Arc;

/// Index whose backend is down
struct DownIndex;

#[async_trait]
impl SemanticIndex for DownIndex {
    async fn index(&self, _doc: IndexedDocument) -> SearchResult<()> {
        Err(SearchError::Unavailable("connection refused".into()))
    }

    async fn remove(&self, _id: &str) -> SearchResult<bool> {
        Err(SearchError::Unavailable("connection refused".into()))
    }

    async fn search(&self, _q: &str, _k: usize, _f: &SearchFilter) -> SearchResult<Vec<ScoredDocument>> {
        Err(SearchError::Unavailable("connection refused".into()))
    }

    async fn len(&self) -> SearchResult<usize> {
        Err(SearchError::Unavailable("connection refused".into()))
    }

    async fn clear(&self) -> SearchResult<()> {
        Err(SearchError::Unavailable("connection refused".into()))
    }
}

/// Graph store whose backend is down
struct DownGraph;

fn down<T>() -> Result<T> {
    Err(AppError::Unavailable("graph store offline".into()))
}

#[async_trait]
impl GraphStore for DownGraph {
    async fn merge_node(&self, _merge: &NodeMerge) -> Result<MergeOutcome> {
        down()
    }
    async fn merge_edge(&self, _merge: &EdgeMerge) -> Result<MergeOutcome> {
        down()
    }
    async fn get_node(&self, _key: &NodeKey) -> Result<Option<Node>> {
        down()
    }
    async fn outgoing(&self, _key: &NodeKey, _t: Option<EdgeType>) -> Result<Vec<Edge>> {
        down()
    }
    async fn incoming(&self, _key: &NodeKey, _t: Option<EdgeType>) -> Result<Vec<Edge>> {
        down()
    }
    async fn nodes_by_label(&self, _label: NodeLabel) -> Result<Vec<Node>> {
        down()
    }
    async fn stats(&self) -> Result<GraphStats> {
        down()
    }
}

/// Graph store whose nodes are readable but whose edges are not
struct NoEdgesGraph(InMemoryGraphStore);

#[async_trait]
impl GraphStore for NoEdgesGraph {
    async fn merge_node(&self, merge: &NodeMerge) -> Result<MergeOutcome> {
        self.0.merge_node(merge).await
    }
    async fn merge_edge(&self, merge: &EdgeMerge) -> Result<MergeOutcome> {
        self.0.merge_edge(merge).await
    }
    async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        self.0.get_node(key).await
    }
    async fn outgoing(&self, _key: &NodeKey, _t: Option<EdgeType>) -> Result<Vec<Edge>> {
        down()
    }
    async fn incoming(&self, _key: &NodeKey, _t: Option<EdgeType>) -> Result<Vec<Edge>> {
        down()
    }
    async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>> {
        self.0.nodes_by_label(label).await
    }
    async fn stats(&self) -> Result<GraphStats> {
        self.0.stats().await
    }
}

fn envelope(kind: &str, key: &str, minute: u32, payload: serde_json::Value) -> serde_json::Value {
    json!({
        "kind": kind,
        "natural_key": key,
        "occurred_at": Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap().to_rfc3339(),
        "payload": payload,
    })
}

/// api depends on postgres; DB-1 hit api and was fixed by scaling the pool
async fn seeded() -> (Arc<dyn GraphStore>, Arc<VectorIndex>) {
    let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
    let index = Arc::new(VectorIndex::new(384, 0.1));
    let pipeline = EventPipeline::new(Arc::new(GraphProjector::new(graph.clone(), index.clone())));

    let events = vec![
        envelope("service_health", "api", 0, json!({"status": "healthy", "dependencies": ["postgres"]})),
        envelope(
            "issue_opened",
            "DB-1",
            1,
            json!({"title": "Database connection timeout", "body": "checkout requests time out waiting for a connection", "component": "api"}),
        ),
        envelope(
            "issue_resolved",
            "DB-1",
            31,
            json!({"solution_id": "scale-pool", "solution": "Scale connection pool", "resolution_minutes": 30, "success_rate": 0.9}),
        ),
        envelope("issue_opened", "UI-7", 40, json!({"title": "Button misaligned on settings page"})),
    ];
    for event in events {
        pipeline.handle_value(event).await.unwrap();
    }

    (graph, index)
}

#[tokio::test]
async fn test_semantic_answer_walks_graph() {
    let (graph, index) = seeded().await;
    let rca = RcaSynthesizer::new(graph, index, RcaConfig::default());

    let result = rca
        .analyze(&RcaQuery::new("database connection timeout on checkout").with_component("api"))
        .await
        .unwrap();

    assert_eq!(result.evidence, Evidence::Semantic);
    assert!(result.verified);
    assert_eq!(result.similar_issues[0].issue_id, "DB-1");
    assert_eq!(result.similar_issues[0].status, "resolved");
    assert_eq!(
        result.similar_issues[0].resolution.as_deref(),
        Some("Scale connection pool")
    );
    assert_eq!(result.recommended_solutions[0].solution_id, "scale-pool");
    assert_eq!(result.recommended_solutions[0].success_rate, Some(0.9));
    assert_eq!(result.estimated_time, EstimatedTime::Minutes(30));
    assert!(result.affected_services.contains(&"api".to_string()));
    assert!(result.affected_services.contains(&"postgres".to_string()));
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
}

#[tokio::test]
async fn test_index_outage_falls_back_to_keywords() {
    let (graph, _) = seeded().await;
    let rca = RcaSynthesizer::new(graph, Arc::new(DownIndex), RcaConfig::default());

    let result = rca.analyze(&RcaQuery::new("connection timeout")).await.unwrap();

    assert_eq!(result.evidence, Evidence::KeywordFallback);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.estimated_time, EstimatedTime::Unknown);
    assert_eq!(result.similar_issues.len(), 1);
    assert_eq!(result.similar_issues[0].issue_id, "DB-1");
    assert_eq!(result.similar_issues[0].similarity, 0.0);
    assert_eq!(result.recommended_solutions[0].title, "Scale connection pool");
}

#[tokio::test]
async fn test_graph_outage_reports_unverified_hits() {
    let (_, index) = seeded().await;
    let healthy = RcaSynthesizer::new(Arc::new(InMemoryGraphStore::new()), index.clone(), RcaConfig::default());
    let rca = RcaSynthesizer::new(Arc::new(DownGraph), index.clone(), RcaConfig::default());

    let query = RcaQuery::new("database connection timeout").with_component("api");
    let result = rca.analyze(&query).await.unwrap();

    assert!(!result.verified);
    assert_eq!(result.evidence, Evidence::Semantic);
    assert_eq!(result.similar_issues[0].issue_id, "DB-1");
    assert_eq!(result.similar_issues[0].title, "Database connection timeout");
    assert!(result.recommended_solutions.is_empty());
    assert_eq!(result.affected_services, vec!["api".to_string()]);

    let hits = index
        .search(&query.search_text(), RcaConfig::default().top_k, &SearchFilter::doc_type("issue"))
        .await
        .unwrap();
    let mean = hits.iter().map(|h| f64::from(h.score)).sum::<f64>() / hits.len() as f64;
    assert!((result.confidence - mean * healthy.policy().unverified_penalty).abs() < 1e-6);
}

#[tokio::test]
async fn test_edge_read_failure_returns_partial_answer() {
    let graph = Arc::new(NoEdgesGraph(InMemoryGraphStore::new()));
    let index = Arc::new(VectorIndex::new(384, 0.1));
    let pipeline = EventPipeline::new(Arc::new(GraphProjector::new(graph.clone(), index.clone())));
    pipeline
        .handle_value(envelope(
            "issue_opened",
            "DB-1",
            1,
            json!({"title": "Database connection timeout", "component": "api"}),
        ))
        .await
        .unwrap();
    let rca = RcaSynthesizer::new(graph, index.clone(), RcaConfig::default());

    let query = RcaQuery::new("database connection timeout").with_component("api");
    let result = rca.analyze(&query).await.unwrap();

    assert_eq!(result.evidence, Evidence::Semantic);
    assert_eq!(result.similar_issues[0].issue_id, "DB-1");
    assert_eq!(result.similar_issues[0].status, "open");
    assert!(result.recommended_solutions.is_empty());
    assert_eq!(result.affected_services, vec!["api".to_string()]);
    assert_eq!(result.estimated_time, EstimatedTime::Unknown);

    let hits = index
        .search(&query.search_text(), RcaConfig::default().top_k, &SearchFilter::doc_type("issue"))
        .await
        .unwrap();
    let mean = hits.iter().map(|h| f64::from(h.score)).sum::<f64>() / hits.len() as f64;
    assert!((result.confidence - mean * rca.policy().unverified_penalty).abs() < 1e-6);
}

#[tokio::test]
async fn test_estimate_derived_from_issue_timeline() {
    let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
    let index = Arc::new(VectorIndex::new(384, 0.1));
    let pipeline = EventPipeline::new(Arc::new(GraphProjector::new(graph.clone(), index.clone())));

    // Resolution delivered before the open; neither carries explicit minutes
    pipeline
        .handle_value(envelope("issue_resolved", "Q-3", 50, json!({"solution_id": "scale-workers", "solution": "Scale workers"})))
        .await
        .unwrap();
    pipeline
        .handle_value(envelope("issue_opened", "Q-3", 5, json!({"title": "Queue backlog growing"})))
        .await
        .unwrap();

    let rca = RcaSynthesizer::new(graph, index, RcaConfig::default());
    let result = rca.analyze(&RcaQuery::new("queue backlog")).await.unwrap();

    assert_eq!(result.evidence, Evidence::Semantic);
    assert_eq!(result.recommended_solutions[0].solution_id, "scale-workers");
    assert_eq!(result.recommended_solutions[0].resolution_minutes, Some(45));
    assert_eq!(result.estimated_time, EstimatedTime::Minutes(45));
}

#[tokio::test]
async fn test_both_backends_down_is_unavailable() {
    let rca = RcaSynthesizer::new(Arc::new(DownGraph), Arc::new(DownIndex), RcaConfig::default());
    let err = rca.analyze(&RcaQuery::new("anything")).await.unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)));
}

#[tokio::test]
async fn test_stale_hits_are_skipped() {
    let (graph, index) = seeded().await;
    index
        .index(
            IndexedDocument::new("issue:GHOST-9", "Database connection timeout everywhere")
                .with_meta("type", "issue")
                .with_meta("title", "Database connection timeout everywhere"),
        )
        .await
        .unwrap();
    let rca = RcaSynthesizer::new(graph, index, RcaConfig::default());

    let result = rca
        .analyze(&RcaQuery::new("database connection timeout"))
        .await
        .unwrap();

    assert_eq!(result.evidence, Evidence::Semantic);
    assert!(result.similar_issues.iter().all(|i| i.issue_id != "GHOST-9"));
    assert!(result.similar_issues.iter().any(|i| i.issue_id == "DB-1"));
}

#[tokio::test]
async fn test_only_stale_hits_use_fallback() {
    let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
    let index = Arc::new(VectorIndex::new(384, 0.1));
    index
        .index(
            IndexedDocument::new("issue:GHOST-9", "Disk quota exceeded")
                .with_meta("type", "issue"),
        )
        .await
        .unwrap();
    let rca = RcaSynthesizer::new(graph, index, RcaConfig::default());

    let result = rca.analyze(&RcaQuery::new("disk quota exceeded")).await.unwrap();

    assert_eq!(result.evidence, Evidence::KeywordFallback);
    assert!(result.similar_issues.is_empty());
    assert_eq!(result.confidence, 0.0);
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let (graph, index) = seeded().await;
    let rca = RcaSynthesizer::new(graph, index, RcaConfig::default());
    let err = rca.analyze(&RcaQuery::new("   ")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
