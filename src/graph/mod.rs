//! Relationship graph: storage backends and the event projector

pub mod memory;
pub mod projector;
pub mod sled_store;
pub mod store;

pub use memory::InMemoryGraphStore;
pub use projector::{GraphProjector, ProjectionPlan, ProjectionResult};
pub use sled_store::SledGraphStore;
pub use store::{GraphStats, GraphStore};
