//! Orchestration layer for image publishing
//!
//! Turns a validated configuration into registry calls: the [`Publisher`]
//! handles a single run, [`retry_failed_destinations`] repeats it for the
//! destinations that failed.

pub mod publisher;
pub mod report;
pub mod retry;

// Re-export main types for convenience
pub use publisher::{PublishOptions, Publisher};
pub use report::{
    EXIT_FATAL, EXIT_PUBLISH_FAILED, EXIT_SUCCESS, PlannedDestination, PublishPlan, RunReport,
};
pub use retry::retry_failed_destinations;
