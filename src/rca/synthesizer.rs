use crate::config::RcaConfig;
use crate::error::{AppError, Result};
use crate::graph::GraphStore;
use crate::metrics::{INDEX_FAILURES_TOTAL, RCA_CONFIDENCE, RCA_DURATION_SECONDS, RCA_REQUESTS_TOTAL};
use crate::models::{
    EdgeType, EstimatedTime, Evidence, Node, NodeKey, NodeLabel, RcaQuery, RcaResult,
    RecommendedSolution, SimilarIssue,
};
use crate::rca::scoring::ScoringPolicy;
use crate::search::{ScoredDocument, SearchFilter, SemanticIndex};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use validator::Validate;

/// Hybrid RCA: semantic hits verified and expanded through the graph, with a
/// keyword fallback over Issue titles
pub struct RcaSynthesizer {
    graph: Arc<dyn GraphStore>,
    index: Arc<dyn SemanticIndex>,
    policy: ScoringPolicy,
    config: RcaConfig,
}

struct VerifiedHit {
    node: Node,
    score: f64,
}

/// Graph context around matched issues
struct Enrichment {
    similar_issues: Vec<SimilarIssue>,
    solutions: Vec<RecommendedSolution>,
    affected_services: Vec<String>,
    /// A graph read failed part way and some context is missing
    partial: bool,
}

impl RcaSynthesizer {
    pub fn new(graph: Arc<dyn GraphStore>, index: Arc<dyn SemanticIndex>, config: RcaConfig) -> Self {
        Self {
            graph,
            index,
            policy: ScoringPolicy::new(config.unverified_penalty),
            config,
        }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub async fn analyze(&self, query: &RcaQuery) -> Result<RcaResult> {
        query.validate()?;
        if query.query.trim().is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }

        let started = Instant::now();
        let result = self.run(query).await;
        RCA_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        if let Ok(r) = &result {
            let evidence = match r.evidence {
                Evidence::Semantic => "semantic",
                Evidence::KeywordFallback => "keyword_fallback",
            };
            RCA_REQUESTS_TOTAL.with_label_values(&[evidence]).inc();
            RCA_CONFIDENCE.observe(r.confidence);
            tracing::info!(
                evidence,
                confidence = r.confidence,
                similar_issues = r.similar_issues.len(),
                affected_services = r.affected_services.len(),
                "RCA synthesized"
            );
        }
        result
    }

    async fn run(&self, query: &RcaQuery) -> Result<RcaResult> {
        let hits = match self
            .index
            .search(&query.search_text(), self.config.top_k, &SearchFilter::doc_type("issue"))
            .await
        {
            Ok(hits) => Some(hits),
            Err(e) => {
                INDEX_FAILURES_TOTAL.with_label_values(&["search"]).inc();
                tracing::warn!(error = %e, "Semantic index unavailable, using keyword fallback");
                None
            }
        };
        let index_available = hits.is_some();
        let hits = hits.unwrap_or_default();

        if !hits.is_empty() {
            match self.verify(&hits).await {
                Ok(verified) if !verified.is_empty() => {
                    return self.semantic_answer(query, verified).await;
                }
                Ok(_) => {
                    tracing::debug!(hits = hits.len(), "All semantic hits were stale");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Graph unavailable, reporting unverified hits");
                    return Ok(self.unverified_answer(query, &hits));
                }
            }
        }

        match self.fallback_answer(query).await {
            Ok(result) => Ok(result),
            Err(e) if !index_available => Err(AppError::Unavailable(format!(
                "semantic index and graph store both unavailable: {}",
                e
            ))),
            Err(e) => Err(AppError::Unavailable(format!("graph store unavailable: {}", e))),
        }
    }

    /// Resolve hits to Issue nodes; unknown ids are stale and dropped
    async fn verify(&self, hits: &[ScoredDocument]) -> Result<Vec<VerifiedHit>> {
        let mut verified = Vec::with_capacity(hits.len());
        for hit in hits {
            let key: NodeKey = match hit.id.parse() {
                Ok(key) => key,
                Err(_) => continue,
            };
            if key.label != NodeLabel::Issue {
                continue;
            }
            match self.graph.get_node(&key).await? {
                Some(node) => verified.push(VerifiedHit {
                    node,
                    score: f64::from(hit.score),
                }),
                None => tracing::debug!(doc_id = %hit.id, "Skipping stale index entry"),
            }
        }
        Ok(verified)
    }

    async fn semantic_answer(&self, query: &RcaQuery, hits: Vec<VerifiedHit>) -> Result<RcaResult> {
        let scores: Vec<f64> = hits.iter().map(|h| h.score).collect();
        let issues: Vec<(Node, f64)> = hits.into_iter().map(|h| (h.node, h.score)).collect();

        let context = self.enrich(query, &issues).await;
        let minutes: Vec<u64> = context
            .solutions
            .iter()
            .filter_map(|s| s.resolution_minutes)
            .collect();

        Ok(RcaResult {
            similar_issues: context.similar_issues,
            affected_services: context.affected_services,
            recommended_solutions: context.solutions,
            estimated_time: EstimatedTime::from_samples(&minutes),
            // A partial answer is scored like an unverified one
            confidence: self.policy.confidence(&scores, !context.partial),
            evidence: Evidence::Semantic,
            verified: true,
        })
    }

    fn unverified_answer(&self, query: &RcaQuery, hits: &[ScoredDocument]) -> RcaResult {
        let issues: Vec<&ScoredDocument> = hits
            .iter()
            .filter(|h| {
                h.id.parse::<NodeKey>()
                    .map(|k| k.label == NodeLabel::Issue)
                    .unwrap_or(false)
            })
            .collect();
        let scores: Vec<f64> = issues.iter().map(|h| f64::from(h.score)).collect();

        let similar_issues = issues
            .iter()
            .map(|h| SimilarIssue {
                issue_id: h
                    .id
                    .parse::<NodeKey>()
                    .map(|k| k.key)
                    .unwrap_or_else(|_| h.id.clone()),
                title: h.metadata.get("title").cloned().unwrap_or_default(),
                similarity: f64::from(h.score),
                resolution: None,
                status: h
                    .metadata
                    .get("status")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
            })
            .collect();

        let affected_services = component_seed(query);

        RcaResult {
            similar_issues,
            affected_services,
            recommended_solutions: Vec::new(),
            estimated_time: EstimatedTime::Unknown,
            confidence: self.policy.confidence(&scores, false),
            evidence: Evidence::Semantic,
            verified: false,
        }
    }

    async fn fallback_answer(&self, query: &RcaQuery) -> Result<RcaResult> {
        let needle = query.query.trim().to_lowercase();
        let mut terms: Vec<String> = needle
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            .filter(|t| t.chars().count() >= 3)
            .map(str::to_string)
            .collect();
        terms.push(needle.clone());
        let terms: BTreeSet<String> = terms.into_iter().collect();

        let mut ranked: Vec<(usize, Node)> = self
            .graph
            .nodes_by_label(NodeLabel::Issue)
            .await?
            .into_iter()
            .filter_map(|node| {
                let title = node.title().to_lowercase();
                if title.is_empty() {
                    return None;
                }
                let matched = terms.iter().filter(|t| title.contains(t.as_str())).count();
                (matched > 0).then_some((matched, node))
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.key.cmp(&b.1.key)));
        ranked.truncate(self.config.fallback_limit);

        let issues: Vec<(Node, f64)> = ranked.into_iter().map(|(_, n)| (n, 0.0)).collect();
        let context = self.enrich(query, &issues).await;

        Ok(RcaResult {
            similar_issues: context.similar_issues,
            affected_services: context.affected_services,
            recommended_solutions: context.solutions,
            estimated_time: EstimatedTime::Unknown,
            confidence: self.policy.fallback_confidence(),
            evidence: Evidence::KeywordFallback,
            verified: true,
        })
    }

    /// Solutions and affected services for matched issues. Graph read
    /// failures drop the affected part of the context instead of the answer.
    async fn enrich(&self, query: &RcaQuery, issues: &[(Node, f64)]) -> Enrichment {
        let mut partial = false;

        let (similar_issues, solutions) = match self.describe_issues(issues).await {
            Ok(described) => described,
            Err(e) => {
                tracing::warn!(error = %e, "Graph read failed while collecting solutions");
                partial = true;
                (issues.iter().map(|(n, s)| similar_issue(n, *s, None)).collect(), Vec::new())
            }
        };

        let affected_services = match self.affected_services(query, issues).await {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!(error = %e, "Graph read failed while walking dependencies");
                partial = true;
                component_seed(query)
            }
        };

        Enrichment {
            similar_issues,
            solutions,
            affected_services,
            partial,
        }
    }

    /// Similar issues plus their solutions, in issue order, solutions de-duplicated
    async fn describe_issues(
        &self,
        issues: &[(Node, f64)],
    ) -> Result<(Vec<SimilarIssue>, Vec<RecommendedSolution>)> {
        let mut similar = Vec::with_capacity(issues.len());
        let mut solutions = Vec::new();
        let mut seen = HashSet::new();

        for (issue, score) in issues {
            let mut edges = self
                .graph
                .outgoing(&issue.key, Some(EdgeType::ResolvedBy))
                .await?;
            edges.sort_by(|a, b| a.key.to.cmp(&b.key.to));

            let mut resolution = None;
            for edge in edges {
                let Some(solution) = self.graph.get_node(&edge.key.to).await? else {
                    continue;
                };
                if resolution.is_none() {
                    resolution = Some(solution.title().to_string());
                }
                if seen.insert(solution.key.clone()) {
                    solutions.push(RecommendedSolution {
                        solution_id: solution.key.key.clone(),
                        title: solution.title().to_string(),
                        success_rate: solution.properties.get_f64("success_rate"),
                        resolution_minutes: solution
                            .properties
                            .get_u64("resolution_minutes")
                            .or_else(|| edge.properties.get_u64("resolution_minutes"))
                            .or_else(|| issue.resolution_minutes()),
                        issue_id: issue.key.key.clone(),
                    });
                }
            }

            similar.push(similar_issue(issue, *score, resolution));
        }

        Ok((similar, solutions))
    }

    /// Seeds plus everything reachable over DEPENDS_ON within the configured depth
    async fn affected_services(&self, query: &RcaQuery, issues: &[(Node, f64)]) -> Result<Vec<String>> {
        let mut seeds: BTreeSet<NodeKey> = BTreeSet::new();

        if let Some(component) = query.component.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            seeds.insert(NodeKey::service(component));
        }

        let tokens: HashSet<String> = query
            .query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        for service in self.graph.nodes_by_label(NodeLabel::Service).await? {
            if tokens.contains(&service.name().to_lowercase()) {
                seeds.insert(service.key.clone());
            }
        }

        for (issue, _) in issues {
            for edge in self
                .graph
                .incoming(&issue.key, Some(EdgeType::HadIssue))
                .await?
            {
                seeds.insert(edge.key.from);
            }
        }

        let mut affected: BTreeSet<NodeKey> = seeds.clone();
        let mut queue: VecDeque<(NodeKey, usize)> = seeds.into_iter().map(|k| (k, 0)).collect();
        while let Some((key, depth)) = queue.pop_front() {
            if depth >= self.config.dependency_depth {
                continue;
            }
            for edge in self.graph.outgoing(&key, Some(EdgeType::DependsOn)).await? {
                if affected.insert(edge.key.to.clone()) {
                    queue.push_back((edge.key.to, depth + 1));
                }
            }
        }

        Ok(affected
            .into_iter()
            .filter(|k| k.label == NodeLabel::Service)
            .map(|k| k.key)
            .collect())
    }
}

fn similar_issue(issue: &Node, similarity: f64, resolution: Option<String>) -> SimilarIssue {
    SimilarIssue {
        issue_id: issue.key.key.clone(),
        title: issue.title().to_string(),
        similarity,
        resolution,
        status: issue
            .properties
            .get_str("status")
            .unwrap_or("unknown")
            .to_string(),
    }
}

/// The query component alone, when the graph cannot be walked
fn component_seed(query: &RcaQuery) -> Vec<String> {
    query
        .component
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}
