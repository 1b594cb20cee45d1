use crate::error::Result;
use crate::models::{Edge, EdgeMerge, EdgeType, MergeOutcome, Node, NodeKey, NodeLabel, NodeMerge};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Natural-key graph repository.
///
/// Merges are create-if-absent, update-if-present and apply the
/// last-writer-wins property rule, so replaying a merge never changes state.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge a node
    async fn merge_node(&self, merge: &NodeMerge) -> Result<MergeOutcome>;

    /// Merge an edge; fails with `DanglingEdge` unless both endpoints exist
    async fn merge_edge(&self, merge: &EdgeMerge) -> Result<MergeOutcome>;

    /// Get a node by natural key
    async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>>;

    /// Edges leaving `key`, optionally of one type
    async fn outgoing(&self, key: &NodeKey, edge_type: Option<EdgeType>) -> Result<Vec<Edge>>;

    /// Edges entering `key`, optionally of one type
    async fn incoming(&self, key: &NodeKey, edge_type: Option<EdgeType>) -> Result<Vec<Edge>>;

    /// All nodes carrying a label
    async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>>;

    /// Node and edge counts
    async fn stats(&self) -> Result<GraphStats>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}
