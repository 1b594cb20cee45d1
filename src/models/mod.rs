pub mod alert;
pub mod event;
pub mod graph;
pub mod rca;
pub mod workflow;

pub use alert::*;
pub use event::*;
pub use graph::*;
pub use rca::*;
pub use workflow::*;
