// Domain Layer - Lifecycle states, outcomes and their rules

pub mod error;
pub mod job;
pub mod outcome;

// Re-exports
pub use error::DomainError;
pub use job::{JobId, JobState};
pub use outcome::{JobOutcome, OutcomeKind, StepFailure};
