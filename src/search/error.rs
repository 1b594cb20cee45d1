//! Error types for semantic index operations

use crate::error::AppError;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during index operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Index backend cannot be reached; callers degrade instead of failing
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// Request rejected by the index
    #[error("Invalid index request: {0}")]
    InvalidRequest(String),

    /// Backend answered with something unusable
    #[error("Index backend error: {0}")]
    Backend(String),
}

impl SearchError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SearchError::Unavailable(_))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SearchError::Backend(err.to_string())
        } else {
            SearchError::Unavailable(err.to_string())
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Unavailable(msg) => AppError::Unavailable(format!("semantic index: {}", msg)),
            SearchError::InvalidRequest(msg) => AppError::Validation(msg),
            SearchError::Backend(msg) => AppError::Internal(format!("semantic index: {}", msg)),
        }
    }
}
