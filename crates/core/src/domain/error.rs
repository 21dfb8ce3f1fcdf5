// Domain Error Types

use super::{JobId, JobState};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: JobState, to: JobState },

    #[error("Job {job} cannot be configured in state {state}")]
    ConfigurationAfterStart { job: JobId, state: JobState },

    #[error("Job {job} does not support rollback")]
    RollbackUnsupported { job: JobId },

    #[error("Job {job} does not wrap a task of type {expected}")]
    TaskTypeMismatch { job: JobId, expected: &'static str },
}

pub type Result<T> = std::result::Result<T, DomainError>;
