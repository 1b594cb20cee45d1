//! Semantic index trait and the in-process vector index

use crate::search::document::{IndexedDocument, ScoredDocument, SearchFilter};
use crate::search::embedding::{cosine, HashingEmbedder};
use crate::search::error::SearchResult;
use async_trait::async_trait;
use dashmap::DashMap;
use hnsw_rs::prelude::*;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Similarity index over node text, keyed by node key string
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Insert or replace a document
    async fn index(&self, doc: IndexedDocument) -> SearchResult<()>;

    /// Remove a document; returns whether it existed
    async fn remove(&self, id: &str) -> SearchResult<bool>;

    /// Top `k` hits in descending score order, each scoring at least the
    /// configured minimum similarity
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> SearchResult<Vec<ScoredDocument>>;

    /// Number of indexed documents
    async fn len(&self) -> SearchResult<usize>;

    /// Drop every document
    async fn clear(&self) -> SearchResult<()>;
}

// HNSW parameters
const MAX_CONNECTIONS: usize = 16;
const MAX_ELEMENTS: usize = 100_000;
const MAX_LAYERS: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH_MIN: usize = 64;

/// Filtered searches ask the graph for this many candidates per wanted hit
const FILTER_OVERFETCH: usize = 4;

/// Cosine distance for hnsw_rs over normalized, non-negative embeddings
#[derive(Clone, Copy, Debug, Default)]
pub struct CosineDistance;

impl Distance<f32> for CosineDistance {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        1.0 - cosine(va, vb)
    }
}

type Graph = Hnsw<'static, f32, CosineDistance>;

fn new_graph() -> Graph {
    Hnsw::new(
        MAX_CONNECTIONS,
        MAX_ELEMENTS,
        MAX_LAYERS,
        EF_CONSTRUCTION,
        CosineDistance,
    )
}

/// In-process approximate nearest-neighbour index.
///
/// HNSW points cannot be deleted, so every insert gets a fresh slot and a
/// replaced or removed document only loses its slot mapping. Dead slots are
/// skipped at search time and dropped when the index is cleared.
#[derive(Clone)]
pub struct VectorIndex {
    embedder: HashingEmbedder,
    min_similarity: f32,
    graph: Arc<RwLock<Graph>>,
    /// document id -> live slot
    docs: Arc<DashMap<String, usize>>,
    /// live slot -> document
    slots: Arc<DashMap<usize, IndexedDocument>>,
    next_slot: Arc<AtomicUsize>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimensions", &self.embedder.dimensions())
            .field("min_similarity", &self.min_similarity)
            .field("documents", &self.docs.len())
            .finish()
    }
}

impl VectorIndex {
    pub fn new(dimensions: usize, min_similarity: f32) -> Self {
        Self {
            embedder: HashingEmbedder::new(dimensions),
            min_similarity,
            graph: Arc::new(RwLock::new(new_graph())),
            docs: Arc::new(DashMap::new()),
            slots: Arc::new(DashMap::new()),
            next_slot: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Points in the HNSW graph that no longer back a document
    pub fn dead_slots(&self) -> usize {
        self.next_slot
            .load(Ordering::Acquire)
            .saturating_sub(self.slots.len())
    }
}

#[async_trait]
impl SemanticIndex for VectorIndex {
    async fn index(&self, doc: IndexedDocument) -> SearchResult<()> {
        let vector = self.embedder.embed(&doc.text);
        let slot = self.next_slot.fetch_add(1, Ordering::AcqRel);
        self.graph.read().insert((&vector, slot));

        let id = doc.id.clone();
        self.slots.insert(slot, doc);
        if let Some(previous) = self.docs.insert(id.clone(), slot) {
            self.slots.remove(&previous);
        }
        tracing::trace!(doc_id = %id, slot, "Document indexed");
        Ok(())
    }

    async fn remove(&self, id: &str) -> SearchResult<bool> {
        Ok(match self.docs.remove(id) {
            Some((_, slot)) => {
                self.slots.remove(&slot);
                true
            }
            None => false,
        })
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> SearchResult<Vec<ScoredDocument>> {
        let inserted = self.next_slot.load(Ordering::Acquire);
        if k == 0 || query.trim().is_empty() || self.slots.is_empty() || inserted == 0 {
            return Ok(Vec::new());
        }

        let mut wanted = k + self.dead_slots();
        if !filter.is_empty() {
            wanted = wanted.saturating_mul(FILTER_OVERFETCH);
        }
        let wanted = wanted.min(inserted);

        let query_vector = self.embedder.embed(query);
        let neighbours = self
            .graph
            .read()
            .search(&query_vector, wanted, wanted.max(EF_SEARCH_MIN));

        let mut hits: Vec<ScoredDocument> = neighbours
            .into_iter()
            .filter_map(|n| {
                let doc = self.slots.get(&n.d_id)?;
                if !filter.matches(&doc.metadata) {
                    return None;
                }
                let score = (1.0 - n.distance).clamp(0.0, 1.0);
                (score >= self.min_similarity).then(|| ScoredDocument {
                    id: doc.id.clone(),
                    score,
                    text: doc.text.clone(),
                    metadata: doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn len(&self) -> SearchResult<usize> {
        Ok(self.docs.len())
    }

    async fn clear(&self) -> SearchResult<()> {
        *self.graph.write() = new_graph();
        self.docs.clear();
        self.slots.clear();
        self.next_slot.store(0, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(id: &str, text: &str) -> IndexedDocument {
        IndexedDocument::new(id, text).with_meta("type", "issue")
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let index = VectorIndex::new(384, 0.1);
        index.index(issue("issue:1", "DB timeout")).await.unwrap();
        index
            .index(issue("issue:2", "TLS certificate expired"))
            .await
            .unwrap();
        index
            .index(
                IndexedDocument::new("solution:1", "database timeout fix")
                    .with_meta("type", "solution"),
            )
            .await
            .unwrap();

        let hits = index
            .search("database timeout", 5, &SearchFilter::doc_type("issue"))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "issue:1");
        assert!(hits[0].score > 0.1 && hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_reindex_replaces() {
        let index = VectorIndex::new(128, 0.1);
        index.index(issue("issue:1", "disk full")).await.unwrap();
        index.index(issue("issue:1", "memory leak")).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);

        let hits = index
            .search("memory leak", 3, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].text, "memory leak");

        assert!(index.remove("issue:1").await.unwrap());
        assert!(!index.remove("issue:1").await.unwrap());
        assert_eq!(index.len().await.unwrap(), 0);
        assert_eq!(index.dead_slots(), 2);
        assert!(index
            .search("memory leak", 3, &SearchFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_replaced_documents_do_not_crowd_out_live_hits() {
        let index = VectorIndex::new(384, 0.0);
        for round in 0..5 {
            index
                .index(issue("issue:1", &format!("replication lag round {}", round)))
                .await
                .unwrap();
        }
        index.index(issue("issue:2", "replication lag")).await.unwrap();

        let hits = index
            .search("replication lag", 2, &SearchFilter::doc_type("issue"))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"issue:1") && ids.contains(&"issue:2"));
        assert_eq!(hits[0].id, "issue:2");

        index.clear().await.unwrap();
        assert_eq!(index.dead_slots(), 0);
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[test]
    fn test_cosine_distance() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!((CosineDistance.eval(&a, &b) - 1.0).abs() < 1e-6);
        assert!(CosineDistance.eval(&a, &a).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_top_k_and_blank_query() {
        let index = VectorIndex::new(384, 0.0);
        for i in 0..10 {
            index
                .index(issue(&format!("issue:{}", i), &format!("queue backlog {}", i)))
                .await
                .unwrap();
        }
        let hits = index
            .search("queue backlog", 3, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        assert!(index
            .search("   ", 3, &SearchFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
