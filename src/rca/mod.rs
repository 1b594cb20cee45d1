//! Root-cause analysis synthesis.
//!
//! A query is answered in one of two ways:
//!
//! 1. **Semantic**: top-k Issue hits from the index are verified against the
//!    graph, then expanded to their solutions and affected services.
//! 2. **Keyword fallback**: when no usable hit exists or the index is down,
//!    Issue titles are matched against the query terms. These answers carry
//!    confidence 0 and an unknown time estimate.
//!
//! See [`scoring`] for how confidence is derived.

pub mod scoring;
pub mod synthesizer;

pub use scoring::ScoringPolicy;
pub use synthesizer::RcaSynthesizer;
