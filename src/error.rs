use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad input; never retried, surfaced to the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed event envelope or payload
    #[error("Schema error on field '{field}': {reason}")]
    Schema { field: String, reason: String },

    /// Downstream timeout or 5xx; retried with backoff
    #[error("Transient error: {0}")]
    Transient(String),

    /// 4xx or exhausted retries; the step is failed and dependents skipped
    #[error("Terminal step error: {0}")]
    TerminalStep(String),

    /// Workflow definition contains a dependency cycle
    #[error("Dependency cycle between steps: {}", steps.join(", "))]
    Cycle { steps: Vec<String> },

    /// Edge merge referencing a node that does not exist
    #[error("Dangling edge: {0}")]
    DanglingEdge(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// A dependency (index, graph store, bus) cannot be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Uniqueness or state conflicts
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Schema {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Schema { .. } => StatusCode::BAD_REQUEST,
            AppError::Cycle { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::DanglingEdge(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::TerminalStep(_) => StatusCode::BAD_GATEWAY,
            AppError::Network(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Schema { .. } => "SCHEMA_ERROR",
            AppError::Transient(_) => "TRANSIENT_ERROR",
            AppError::TerminalStep(_) => "TERMINAL_STEP_ERROR",
            AppError::Cycle { .. } => "CYCLE_ERROR",
            AppError::DanglingEdge(_) => "DANGLING_EDGE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unavailable(_) => "UNAVAILABLE",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Transient(_)
                | AppError::Unavailable(_)
                | AppError::Network(_)
                | AppError::Timeout(_)
        )
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code().to_string();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                error_code = %error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                error_code = %error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request rejected"
            );
        }

        let mut error = json!({
            "code": error_code,
            "message": message,
            "status": status.as_u16(),
        });

        match &self {
            AppError::Schema { field, reason } => {
                error["field"] = json!(field);
                error["reason"] = json!(reason);
            }
            AppError::Cycle { steps } => {
                error["steps"] = json!(steps);
            }
            _ => {}
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from serde_yaml::Error
impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<sled::Error> for AppError {
    fn from(err: sled::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// A multi-tree sled transaction aborts only on a record that fails to encode or decode
impl From<sled::transaction::TransactionError<serde_json::Error>> for AppError {
    fn from(err: sled::transaction::TransactionError<serde_json::Error>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e.into(),
            sled::transaction::TransactionError::Storage(e) => e.into(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            AppError::Unavailable(format!("redis: {}", err))
        } else {
            AppError::Storage(format!("redis: {}", err))
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
