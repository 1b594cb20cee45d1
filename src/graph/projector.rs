//! Event → graph projection.
//!
//! Every event kind maps to a deterministic [`ProjectionPlan`] of node merges
//! followed by edge merges. Plans only use natural keys and the event's
//! `occurred_at` stamp, so replaying an event leaves the graph unchanged and
//! unrelated events commute.

use crate::error::Result;
use crate::graph::GraphStore;
use crate::metrics::{EVENTS_PROJECTED_TOTAL, GRAPH_MERGES_TOTAL, INDEX_FAILURES_TOTAL, PROJECTION_DURATION_SECONDS};
use crate::models::{
    CommitPayload, DocumentPayload, EdgeMerge, EdgeType, Event, EventBody, IssueOpenedPayload,
    IssueResolvedPayload, MergeOutcome, NodeKey, NodeLabel, NodeMerge, RunbookPayload,
    ServiceHealthPayload, TaskCreatedPayload,
};
use crate::search::{IndexedDocument, SemanticIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use strum::IntoEnumIterator;

/// Ordered merges derived from one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionPlan {
    pub nodes: Vec<NodeMerge>,
    pub edges: Vec<EdgeMerge>,
}

impl ProjectionPlan {
    /// Build the plan for an event. The plan depends on the event alone, so
    /// the resulting graph is independent of delivery order.
    pub fn for_event(event: &Event) -> Self {
        let mut plan = PlanBuilder::new(event.occurred_at);
        let key = event.natural_key.as_str();

        match &event.body {
            EventBody::Commit(p) => plan.commit(key, p),
            EventBody::ServiceHealth(p) => plan.service_health(key, p),
            EventBody::IssueOpened(p) => plan.issue_opened(key, p),
            EventBody::IssueResolved(p) => plan.issue_resolved(key, p),
            EventBody::DocumentPublished(p) => plan.document_published(key, p),
            EventBody::RunbookPublished(p) => plan.runbook_published(key, p),
            EventBody::TaskCreated(p) => plan.task_created(key, p),
        }

        plan.finish()
    }
}

struct PlanBuilder {
    stamp: DateTime<Utc>,
    plan: ProjectionPlan,
    seen: BTreeSet<NodeKey>,
}

impl PlanBuilder {
    fn new(stamp: DateTime<Utc>) -> Self {
        Self {
            stamp,
            plan: ProjectionPlan::default(),
            seen: BTreeSet::new(),
        }
    }

    fn node(&mut self, merge: NodeMerge) {
        match self.plan.nodes.iter_mut().find(|n| n.key == merge.key) {
            Some(existing) => existing.properties.extend(merge.properties),
            None => {
                self.seen.insert(merge.key.clone());
                self.plan.nodes.push(merge);
            }
        }
    }

    /// Ensure a node exists without writing properties
    fn touch(&mut self, key: NodeKey) {
        if !self.seen.contains(&key) {
            self.node(NodeMerge::new(key, self.stamp));
        }
    }

    fn edge(&mut self, from: NodeKey, edge_type: EdgeType, to: NodeKey) -> &mut EdgeMerge {
        self.plan
            .edges
            .push(EdgeMerge::new(from, edge_type, to, self.stamp));
        let last = self.plan.edges.len() - 1;
        &mut self.plan.edges[last]
    }

    fn merge(&self, key: NodeKey) -> NodeMerge {
        NodeMerge::new(key, self.stamp)
    }

    fn timestamp(&self) -> Value {
        Value::String(self.stamp.to_rfc3339())
    }

    fn commit(&mut self, hash: &str, p: &CommitPayload) {
        let commit = NodeKey::commit(hash);
        self.node(
            self.merge(commit.clone())
                .set_opt("author", p.author.clone())
                .set_opt("author_email", p.author_email.clone())
                .set_opt("message", p.message.clone())
                .set_opt("repository", p.repository.clone())
                .set("files_changed", p.files_changed.clone())
                .set("committed_at", self.timestamp()),
        );

        for service in unique(&p.services) {
            let service = NodeKey::service(service);
            self.touch(service.clone());
            self.edge(commit.clone(), EdgeType::Modifies, service);
        }
    }

    fn service_health(&mut self, name: &str, p: &ServiceHealthPayload) {
        let service = NodeKey::service(name);
        self.node(
            self.merge(service.clone())
                .set_opt("status", p.status.clone())
                .set_opt("version", p.version.clone())
                .set_opt("owner", p.owner.clone())
                .set("last_health_check", self.timestamp()),
        );

        for dependency in unique(&p.dependencies) {
            if dependency == name {
                continue;
            }
            let dependency = NodeKey::service(dependency);
            self.touch(dependency.clone());
            self.edge(service.clone(), EdgeType::DependsOn, dependency);
        }
    }

    fn issue_opened(&mut self, id: &str, p: &IssueOpenedPayload) {
        let issue = NodeKey::issue(id);
        self.node(
            self.merge(issue.clone())
                .set("title", p.title.clone())
                .set_opt("body", p.body.clone())
                .set("labels", p.labels.clone())
                .set_opt("severity", p.severity.clone())
                .set_opt("repository", p.repository.clone())
                .set_opt("component", p.component.clone())
                .set_opt("tenant_id", p.tenant_id.clone())
                .set("status", "open")
                .set("opened_at", self.timestamp()),
        );

        if let Some(tenant) = p.tenant_id.as_deref().filter(|t| !t.is_empty()) {
            self.touch(NodeKey::tenant(tenant));
        }

        let services: Vec<String> = p
            .component
            .iter()
            .chain(p.services.iter())
            .cloned()
            .collect();
        for service in unique(&services) {
            let service = NodeKey::service(service);
            self.touch(service.clone());
            self.edge(service, EdgeType::HadIssue, issue.clone());
        }
    }

    /// Derived resolution time is not stored here; it is read from the
    /// issue's `opened_at`/`resolved_at` stamps, which converge under LWW.
    fn issue_resolved(&mut self, id: &str, p: &IssueResolvedPayload) {
        let issue = NodeKey::issue(id);
        self.node(
            self.merge(issue.clone())
                .set_opt("title", p.title.clone())
                .set("status", "resolved")
                .set("resolved_at", self.timestamp()),
        );

        let solution_key = p
            .solution_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("sol-{}", id));
        let title = p.solution.clone().unwrap_or_else(|| {
            let issue_title = p
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| id.to_string());
            format!("Resolution of {}", issue_title)
        });

        let solution = NodeKey::solution(solution_key);
        self.node(
            self.merge(solution.clone())
                .set("title", title)
                .set_opt("description", p.description.clone())
                .set_opt("resolution_minutes", p.resolution_minutes)
                .set_opt("resolved_by", p.resolved_by.clone())
                .set_opt("success_rate", p.success_rate)
                .set("resolved_at", self.timestamp()),
        );

        let edge = self.edge(issue, EdgeType::ResolvedBy, solution);
        if let Some(minutes) = p.resolution_minutes {
            edge.properties
                .insert("resolution_minutes".to_string(), Value::from(minutes));
        }
    }

    fn document_published(&mut self, path: &str, p: &DocumentPayload) {
        let document = NodeKey::document(path);
        self.node(
            self.merge(document.clone())
                .set("title", p.title.clone())
                .set_opt("content", p.content.clone())
                .set_opt("category", p.category.clone())
                .set("published_at", self.timestamp()),
        );

        for service in unique(&p.services) {
            let service = NodeKey::service(service);
            self.touch(service.clone());
            self.edge(document.clone(), EdgeType::Documents, service);
        }
        for issue in unique(&p.issues) {
            let issue = NodeKey::issue(issue);
            self.touch(issue.clone());
            self.edge(document.clone(), EdgeType::Documents, issue);
        }
    }

    fn runbook_published(&mut self, name: &str, p: &RunbookPayload) {
        let runbook = NodeKey::document(name);
        self.node(
            self.merge(runbook.clone())
                .set("title", p.title.clone())
                .set("category", "runbook")
                .set_opt("topic", p.category.clone())
                .set("step_count", p.steps.len() as u64)
                .set("published_at", self.timestamp()),
        );

        let mut previous: Option<NodeKey> = None;
        for (i, step) in p.steps.iter().enumerate() {
            let number = (i + 1) as u64;
            let key = NodeKey::document(format!("{}#step-{}", name, number));
            self.node(
                self.merge(key.clone())
                    .set("title", step.title.clone())
                    .set_opt("content", step.description.clone())
                    .set("category", "runbook_step")
                    .set("runbook", name)
                    .set("step_number", number),
            );
            self.edge(runbook.clone(), EdgeType::HasStep, key.clone())
                .properties
                .insert("order".to_string(), Value::from(number));
            if let Some(prev) = previous.take() {
                self.edge(prev, EdgeType::NextStep, key.clone());
            }
            previous = Some(key);
        }

        for prerequisite in unique(&p.requires) {
            if prerequisite == name {
                continue;
            }
            let prerequisite = NodeKey::document(prerequisite);
            self.touch(prerequisite.clone());
            self.edge(runbook.clone(), EdgeType::Requires, prerequisite);
        }
        for service in unique(&p.services) {
            let service = NodeKey::service(service);
            self.touch(service.clone());
            self.edge(runbook.clone(), EdgeType::AppliesTo, service);
        }
    }

    fn task_created(&mut self, tenant: &str, p: &TaskCreatedPayload) {
        self.node(
            self.merge(NodeKey::tenant(tenant))
                .set_opt("last_task_id", p.task_id.clone())
                .set_opt("last_task_name", p.task_name.clone())
                .set_opt("created_from", p.created_from.clone())
                .set("last_activity", self.timestamp()),
        );
    }

    fn finish(self) -> ProjectionPlan {
        self.plan
    }
}

/// Non-empty names in first-seen order without repeats
fn unique(names: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty() && seen.insert(*n))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub key: String,
    pub outcome: MergeOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub kind: String,
    pub natural_key: String,
    pub nodes: Vec<MergeReport>,
    pub edges: Vec<MergeReport>,
    pub indexed: usize,
    pub index_failures: usize,
}

impl ProjectionResult {
    /// True when the event changed nothing in the graph
    pub fn is_noop(&self) -> bool {
        self.nodes
            .iter()
            .chain(self.edges.iter())
            .all(|r| r.outcome == MergeOutcome::Unchanged)
    }
}

/// Applies event plans to the graph and keeps the semantic index in step
#[derive(Clone)]
pub struct GraphProjector {
    graph: Arc<dyn GraphStore>,
    index: Arc<dyn SemanticIndex>,
}

impl GraphProjector {
    pub fn new(graph: Arc<dyn GraphStore>, index: Arc<dyn SemanticIndex>) -> Self {
        Self { graph, index }
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }


    pub async fn project(&self, event: &Event) -> Result<ProjectionResult> {
        let started = Instant::now();
        let kind = event.kind().to_string();

        let result = self.apply(event).await;

        PROJECTION_DURATION_SECONDS
            .with_label_values(&[kind.as_str()])
            .observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(r) => {
                let outcome = if r.is_noop() { "noop" } else { "applied" };
                EVENTS_PROJECTED_TOTAL
                    .with_label_values(&[kind.as_str(), outcome])
                    .inc();
                tracing::debug!(
                    kind = %kind,
                    natural_key = %event.natural_key,
                    nodes = r.nodes.len(),
                    edges = r.edges.len(),
                    noop = r.is_noop(),
                    "Event projected"
                );
            }
            Err(e) => {
                EVENTS_PROJECTED_TOTAL
                    .with_label_values(&[kind.as_str(), "failed"])
                    .inc();
                tracing::warn!(
                    kind = %kind,
                    natural_key = %event.natural_key,
                    error = %e,
                    "Event projection failed"
                );
            }
        }

        result
    }

    async fn apply(&self, event: &Event) -> Result<ProjectionResult> {
        let plan = ProjectionPlan::for_event(event);

        let mut nodes = Vec::with_capacity(plan.nodes.len());
        for merge in &plan.nodes {
            let outcome = self.graph.merge_node(merge).await?;
            record_merge("node", outcome);
            nodes.push(MergeReport {
                key: merge.key.to_string(),
                outcome,
            });
        }

        let mut edges = Vec::with_capacity(plan.edges.len());
        for merge in &plan.edges {
            let outcome = self.graph.merge_edge(merge).await?;
            record_merge("edge", outcome);
            edges.push(MergeReport {
                key: merge.key.to_string(),
                outcome,
            });
        }

        let mut indexed = 0;
        let mut index_failures = 0;
        for (merge, report) in plan.nodes.iter().zip(&nodes) {
            if !merge.key.label.is_indexed() || report.outcome == MergeOutcome::Unchanged {
                continue;
            }
            match self.index_node(&merge.key).await {
                Ok(true) => indexed += 1,
                Ok(false) => {}
                Err(e) => {
                    index_failures += 1;
                    INDEX_FAILURES_TOTAL.with_label_values(&["index"]).inc();
                    tracing::warn!(node = %merge.key, error = %e, "Failed to index node");
                }
            }
        }

        Ok(ProjectionResult {
            kind: event.kind().to_string(),
            natural_key: event.natural_key.clone(),
            nodes,
            edges,
            indexed,
            index_failures,
        })
    }

    async fn index_node(&self, key: &NodeKey) -> Result<bool> {
        let node = match self.graph.get_node(key).await? {
            Some(node) => node,
            None => return Ok(false),
        };
        match IndexedDocument::from_node(&node) {
            Some(doc) => {
                self.index.index(doc).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-index every indexable node from the graph; returns the count
    pub async fn rebuild_index(&self) -> Result<usize> {
        self.index.clear().await?;

        let mut count = 0;
        for label in NodeLabel::iter().filter(|l| l.is_indexed()) {
            for node in self.graph.nodes_by_label(label).await? {
                if let Some(doc) = IndexedDocument::from_node(&node) {
                    if let Err(e) = self.index.index(doc).await {
                        INDEX_FAILURES_TOTAL.with_label_values(&["rebuild"]).inc();
                        return Err(e.into());
                    }
                    count += 1;
                }
            }
        }

        tracing::info!(documents = count, "Semantic index rebuilt from graph");
        Ok(count)
    }
}

fn record_merge(entity: &str, outcome: MergeOutcome) {
    let outcome = match outcome {
        MergeOutcome::Created => "created",
        MergeOutcome::Updated => "updated",
        MergeOutcome::Unchanged => "unchanged",
    };
    GRAPH_MERGES_TOTAL.with_label_values(&[entity, outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunbookStep;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_nodes_precede_edges_and_endpoints_exist() {
        let event = Event::new(
            "DB-17",
            at("2024-05-01T10:00:00Z"),
            EventBody::IssueOpened(IssueOpenedPayload {
                title: "DB timeout".into(),
                component: Some("payments".into()),
                services: vec!["payments".into(), "ledger".into()],
                tenant_id: Some("acme".into()),
                ..Default::default()
            }),
        );
        let plan = ProjectionPlan::for_event(&event);

        let keys: BTreeSet<NodeKey> = plan.nodes.iter().map(|n| n.key.clone()).collect();
        assert!(keys.contains(&NodeKey::tenant("acme")));
        assert_eq!(plan.edges.len(), 2, "component is not linked twice");
        for edge in &plan.edges {
            assert!(keys.contains(&edge.key.from));
            assert!(keys.contains(&edge.key.to));
            assert_eq!(edge.key.edge_type, EdgeType::HadIssue);
        }
    }

    #[test]
    fn test_resolution_plan_is_independent_of_graph_state() {
        let event = Event::new(
            "DB-17",
            at("2024-05-01T10:45:00Z"),
            EventBody::IssueResolved(IssueResolvedPayload {
                resolution_minutes: Some(40),
                ..Default::default()
            }),
        );
        let plan = ProjectionPlan::for_event(&event);

        let solution = plan
            .nodes
            .iter()
            .find(|n| n.key == NodeKey::solution("sol-DB-17"))
            .unwrap();
        assert_eq!(solution.properties["resolution_minutes"], Value::from(40u64));
        assert_eq!(solution.properties["title"], Value::from("Resolution of DB-17"));
        assert_eq!(plan.edges[0].key.edge_type, EdgeType::ResolvedBy);

        let issue = plan.nodes.iter().find(|n| n.key == NodeKey::issue("DB-17")).unwrap();
        assert_eq!(issue.properties["resolved_at"], Value::from("2024-05-01T10:45:00+00:00"));
    }

    #[test]
    fn test_runbook_steps_are_chained() {
        let event = Event::new(
            "restart-db",
            at("2024-05-01T10:00:00Z"),
            EventBody::RunbookPublished(RunbookPayload {
                title: "Restart DB".into(),
                steps: vec![
                    RunbookStep { title: "drain".into(), description: None },
                    RunbookStep { title: "restart".into(), description: None },
                    RunbookStep { title: "verify".into(), description: None },
                ],
                requires: vec!["failover".into()],
                services: vec!["db".into()],
                ..Default::default()
            }),
        );
        let plan = ProjectionPlan::for_event(&event);

        let count = |t: EdgeType| plan.edges.iter().filter(|e| e.key.edge_type == t).count();
        assert_eq!(count(EdgeType::HasStep), 3);
        assert_eq!(count(EdgeType::NextStep), 2);
        assert_eq!(count(EdgeType::Requires), 1);
        assert_eq!(count(EdgeType::AppliesTo), 1);
        assert!(plan
            .nodes
            .iter()
            .any(|n| n.key == NodeKey::document("restart-db#step-2")));
    }

    #[test]
    fn test_self_dependency_ignored() {
        let event = Event::new(
            "api",
            Utc::now(),
            EventBody::ServiceHealth(ServiceHealthPayload {
                dependencies: vec!["api".into(), "db".into(), "db".into()],
                ..Default::default()
            }),
        );
        let plan = ProjectionPlan::for_event(&event);
        assert_eq!(plan.edges.len(), 1);
        assert_eq!(plan.nodes.len(), 2);
    }
}
