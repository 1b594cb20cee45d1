//! Workflow orchestration.
//!
//! A workflow is a DAG of HTTP steps. Registration validates the graph,
//! the allow-list and any cron schedule; execution starts each step as
//! soon as its dependencies complete, retries transient failures with
//! backoff, and skips everything downstream of a failed step.
//!
//! | outcome of an attempt                    | effect            |
//! |------------------------------------------|-------------------|
//! | 2xx, JSON or empty body                  | step completed    |
//! | 2xx, other body                          | failed, raw body  |
//! | 4xx except 408/429                       | failed            |
//! | 5xx, 408, 429, timeout, connection error | retried           |

pub mod allowlist;
pub mod dag;
pub mod executor;
pub mod retry;
pub mod runner;
pub mod scheduler;

pub use allowlist::AllowList;
pub use dag::ExecutionPlan;
pub use executor::{StepLimits, WorkflowOrchestrator};
pub use runner::{HttpStepRunner, StepOutcome, StepRunner};
pub use scheduler::{validate_schedule, WorkflowScheduler};
