//! Semantic index over Issue, Solution and Document text.
//!
//! The index is a derived view of the graph: the projector feeds it after
//! every merge, it may lag behind, and it can be rebuilt from the graph at
//! any time. Two backends exist:
//!
//! - [`VectorIndex`]: in-process, feature-hashing embeddings in an HNSW graph
//! - [`RemoteVectorIndex`]: HTTP client for an external vector-search service
//!
//! Backend outages surface as [`SearchError::Unavailable`] so callers can
//! degrade instead of failing.

pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod remote;

pub use document::{IndexedDocument, ScoredDocument, SearchFilter};
pub use embedding::HashingEmbedder;
pub use error::{SearchError, SearchResult};
pub use index::{SemanticIndex, VectorIndex};
pub use remote::RemoteVectorIndex;

use crate::config::{SearchBackend, SearchConfig};
use crate::error::{AppError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Create the semantic index selected by configuration
pub fn create_index(config: &SearchConfig) -> Result<Arc<dyn SemanticIndex>> {
    match config.backend {
        SearchBackend::InProcess => {
            tracing::info!(
                dimensions = config.dimensions,
                min_similarity = config.min_similarity,
                "Initializing in-process vector index"
            );
            Ok(Arc::new(VectorIndex::new(
                config.dimensions,
                config.min_similarity,
            )))
        }
        SearchBackend::Remote => {
            let url = config.remote_url.as_ref().ok_or_else(|| {
                AppError::Configuration("Remote search backend requires 'remote_url'".to_string())
            })?;
            tracing::info!(url = %url, "Initializing remote vector index");
            Ok(Arc::new(RemoteVectorIndex::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
                config.min_similarity,
            )?))
        }
    }
}
