//! Opsgraph: an event-driven operational intelligence engine.
//!
//! Operational events are projected into a relationship graph and a
//! semantic index. Root-cause queries combine both. Alerts are
//! deduplicated by fingerprint and escalated when left unattended, and
//! remediation runs as DAG workflows of HTTP steps.

pub mod alerts;
pub mod api;
pub mod config;
pub mod error;
pub mod graph;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod rca;
pub mod search;
pub mod state;

pub use error::{AppError, Result};
