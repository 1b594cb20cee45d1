//! Repositories for alerts, workflows and executions

pub mod factory;
pub mod memory;
pub mod sled_store;
pub mod store;

pub use factory::{create_stores, create_in_memory_stores, Stores};
pub use memory::InMemoryStore;
pub use sled_store::SledStore;
pub use store::{AlertRuleStore, AlertStore, ExecutionStore, WorkflowStore};
