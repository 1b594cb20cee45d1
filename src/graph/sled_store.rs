use crate::error::{AppError, Result};
use crate::graph::{GraphStats, GraphStore};
use crate::models::{Edge, EdgeKey, EdgeMerge, EdgeType, MergeOutcome, Node, NodeKey, NodeLabel, NodeMerge};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

const SEP: char = '\u{1f}';

/// Persistent graph store on sled.
///
/// Layout: `graph_nodes` maps `label:key` to the JSON node, `graph_out` maps
/// `from SEP TYPE SEP to` to the JSON edge, and `graph_in` mirrors it as
/// `to SEP TYPE SEP from` with the outgoing key as value. Both edge trees
/// are written in one transaction.
#[derive(Clone)]
pub struct SledGraphStore {
    nodes: sled::Tree,
    out_edges: sled::Tree,
    in_edges: sled::Tree,
}

impl SledGraphStore {
    pub fn new(db: &sled::Db) -> Result<Self> {
        let store = Self {
            nodes: db.open_tree("graph_nodes")?,
            out_edges: db.open_tree("graph_out")?,
            in_edges: db.open_tree("graph_in")?,
        };
        tracing::info!(nodes = store.nodes.len(), "Opened sled graph store");
        Ok(store)
    }

    fn out_key(key: &EdgeKey) -> String {
        format!("{}{SEP}{}{SEP}{}", key.from, key.edge_type, key.to)
    }

    fn in_key(key: &EdgeKey) -> String {
        format!("{}{SEP}{}{SEP}{}", key.to, key.edge_type, key.from)
    }

    fn prefix(key: &NodeKey, edge_type: Option<EdgeType>) -> String {
        match edge_type {
            Some(t) => format!("{}{SEP}{}{SEP}", key, t),
            None => format!("{}{SEP}", key),
        }
    }

    /// Read-modify-write under compare-and-swap, retried on contention
    fn merge_json<T, C, A>(tree: &sled::Tree, key: &[u8], create: C, apply: A) -> Result<MergeOutcome>
    where
        T: Serialize + DeserializeOwned,
        C: Fn() -> T,
        A: Fn(&mut T) -> MergeOutcome,
    {
        loop {
            let current = tree.get(key)?;
            let (next, outcome) = match &current {
                Some(bytes) => {
                    let mut value: T = serde_json::from_slice(bytes)?;
                    let outcome = apply(&mut value);
                    (value, outcome)
                }
                None => (create(), MergeOutcome::Created),
            };

            if outcome == MergeOutcome::Unchanged {
                return Ok(outcome);
            }

            let encoded = serde_json::to_vec(&next)?;
            match tree.compare_and_swap(key, current, Some(encoded))? {
                Ok(()) => return Ok(outcome),
                Err(_) => continue,
            }
        }
    }

    fn decode_all<T: DeserializeOwned>(iter: sled::Iter) -> Result<Vec<T>> {
        iter.map(|item| -> Result<T> {
            let (_, bytes) = item?;
            Ok(serde_json::from_slice(&bytes)?)
        })
        .collect()
    }
}

#[async_trait]
impl GraphStore for SledGraphStore {
    async fn merge_node(&self, merge: &NodeMerge) -> Result<MergeOutcome> {
        let key = merge.key.to_string();
        Self::merge_json(
            &self.nodes,
            key.as_bytes(),
            || Node::from_merge(merge),
            |node: &mut Node| node.apply(merge),
        )
    }

    async fn merge_edge(&self, merge: &EdgeMerge) -> Result<MergeOutcome> {
        let key = &merge.key;
        for endpoint in [&key.from, &key.to] {
            if !self.nodes.contains_key(endpoint.to_string().as_bytes())? {
                return Err(AppError::DanglingEdge(format!(
                    "{} references missing node {}",
                    key, endpoint
                )));
            }
        }

        let out_key = Self::out_key(key);
        let in_key = Self::in_key(key);

        let outcome = (&self.out_edges, &self.in_edges).transaction(|(out_edges, in_edges)| {
            let (next, outcome) = match out_edges.get(out_key.as_bytes())? {
                Some(bytes) => {
                    let mut edge: Edge = serde_json::from_slice(&bytes)
                        .map_err(ConflictableTransactionError::Abort)?;
                    let outcome = edge.apply(merge);
                    (edge, outcome)
                }
                None => (Edge::from_merge(merge), MergeOutcome::Created),
            };

            if outcome != MergeOutcome::Unchanged {
                let encoded =
                    serde_json::to_vec(&next).map_err(ConflictableTransactionError::Abort)?;
                out_edges.insert(out_key.as_bytes(), encoded)?;
            }
            // Replays restore a missing mirror entry
            if in_edges.get(in_key.as_bytes())?.is_none() {
                in_edges.insert(in_key.as_bytes(), out_key.as_bytes())?;
            }
            Ok(outcome)
        })?;

        Ok(outcome)
    }

    async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        match self.nodes.get(key.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn outgoing(&self, key: &NodeKey, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        Self::decode_all(self.out_edges.scan_prefix(Self::prefix(key, edge_type).as_bytes()))
    }

    async fn incoming(&self, key: &NodeKey, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        let mut edges = Vec::new();
        for item in self.in_edges.scan_prefix(Self::prefix(key, edge_type).as_bytes()) {
            let (_, out_key) = item?;
            if let Some(bytes) = self.out_edges.get(&out_key)? {
                edges.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(edges)
    }

    async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>> {
        Self::decode_all(self.nodes.scan_prefix(format!("{}:", label).as_bytes()))
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            nodes: self.nodes.len(),
            edges: self.out_edges.len(),
        })
    }
}
