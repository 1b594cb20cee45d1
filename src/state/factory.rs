use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::graph::{GraphStore, InMemoryGraphStore, SledGraphStore};
use crate::state::{AlertRuleStore, AlertStore, ExecutionStore, InMemoryStore, SledStore, WorkflowStore};
use std::sync::Arc;

/// Every repository the engine needs, backed by one storage backend
#[derive(Clone)]
pub struct Stores {
    pub graph: Arc<dyn GraphStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub rules: Arc<dyn AlertRuleStore>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub executions: Arc<dyn ExecutionStore>,
}

/// Create the repositories selected by configuration.
///
/// The sled backend opens the database once and shares it, since sled
/// holds an exclusive lock on its directory.
pub fn create_stores(config: &StateConfig) -> Result<Stores> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled storage backend");

            let state = SledStore::open(path)?;
            let graph = SledGraphStore::new(state.db())?;
            let state = Arc::new(state);
            Ok(Stores {
                graph: Arc::new(graph),
                alerts: state.clone(),
                rules: state.clone(),
                workflows: state.clone(),
                executions: state,
            })
        }
        StateBackend::Memory => Ok(create_in_memory_stores()),
    }
}

/// In-memory repositories (for testing and development)
pub fn create_in_memory_stores() -> Stores {
    tracing::info!("Initializing in-memory storage backend");
    let state = Arc::new(InMemoryStore::new());
    Stores {
        graph: Arc::new(InMemoryGraphStore::new()),
        alerts: state.clone(),
        rules: state.clone(),
        workflows: state.clone(),
        executions: state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeKey, NodeMerge};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_sled_stores_share_one_database() {
        let temp_dir = TempDir::new().unwrap();
        let config = StateConfig {
            backend: StateBackend::Sled,
            path: Some(temp_dir.path().to_path_buf()),
            redis_url: None,
        };

        let stores = create_stores(&config).unwrap();
        stores
            .graph
            .merge_node(&NodeMerge::new(NodeKey::service("db"), Utc::now()))
            .await
            .unwrap();
        assert_eq!(stores.graph.stats().await.unwrap().nodes, 1);
        assert!(stores.alerts.list_active(None).await.unwrap().is_empty());
        assert!(stores.rules.list_rules().await.unwrap().is_empty());
    }

    #[test]
    fn test_sled_requires_path() {
        let config = StateConfig {
            backend: StateBackend::Sled,
            path: None,
            redis_url: None,
        };
        assert!(matches!(
            create_stores(&config),
            Err(AppError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_create_in_memory_stores() {
        let stores = create_in_memory_stores();
        assert!(stores.workflows.list_workflows().await.unwrap().is_empty());
    }
}
