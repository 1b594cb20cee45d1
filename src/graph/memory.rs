use crate::error::{AppError, Result};
use crate::graph::{GraphStats, GraphStore};
use crate::models::{Edge, EdgeKey, EdgeMerge, EdgeType, MergeOutcome, Node, NodeKey, NodeLabel, NodeMerge};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// In-memory graph store (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryGraphStore {
    nodes: Arc<DashMap<NodeKey, Node>>,
    edges: Arc<DashMap<EdgeKey, Edge>>,
    out_index: Arc<DashMap<NodeKey, BTreeSet<EdgeKey>>>,
    in_index: Arc<DashMap<NodeKey, BTreeSet<EdgeKey>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(
        &self,
        index: &DashMap<NodeKey, BTreeSet<EdgeKey>>,
        key: &NodeKey,
        edge_type: Option<EdgeType>,
    ) -> Vec<Edge> {
        let keys: Vec<EdgeKey> = match index.get(key) {
            Some(set) => set
                .iter()
                .filter(|k| edge_type.map_or(true, |t| k.edge_type == t))
                .cloned()
                .collect(),
            None => return Vec::new(),
        };

        keys.iter()
            .filter_map(|k| self.edges.get(k).map(|e| e.value().clone()))
            .collect()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn merge_node(&self, merge: &NodeMerge) -> Result<MergeOutcome> {
        let outcome = match self.nodes.entry(merge.key.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().apply(merge),
            Entry::Vacant(entry) => {
                entry.insert(Node::from_merge(merge));
                MergeOutcome::Created
            }
        };

        tracing::trace!(node = %merge.key, ?outcome, "Node merged");
        Ok(outcome)
    }

    async fn merge_edge(&self, merge: &EdgeMerge) -> Result<MergeOutcome> {
        let key = &merge.key;
        for endpoint in [&key.from, &key.to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(AppError::DanglingEdge(format!(
                    "{} references missing node {}",
                    key, endpoint
                )));
            }
        }

        let outcome = match self.edges.entry(key.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().apply(merge),
            Entry::Vacant(entry) => {
                entry.insert(Edge::from_merge(merge));
                MergeOutcome::Created
            }
        };

        if outcome == MergeOutcome::Created {
            self.out_index
                .entry(key.from.clone())
                .or_default()
                .insert(key.clone());
            self.in_index
                .entry(key.to.clone())
                .or_default()
                .insert(key.clone());
        }

        tracing::trace!(edge = %key, ?outcome, "Edge merged");
        Ok(outcome)
    }

    async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        Ok(self.nodes.get(key).map(|entry| entry.clone()))
    }

    async fn outgoing(&self, key: &NodeKey, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        Ok(self.collect(&self.out_index, key, edge_type))
    }

    async fn incoming(&self, key: &NodeKey, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        Ok(self.collect(&self.in_index, key, edge_type))
    }

    async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|entry| entry.key().label == label)
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
        })
    }
}
