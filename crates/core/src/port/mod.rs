// Port Layer - Interfaces implemented outside the framework

pub mod job_task;
pub mod listener;

// Re-exports
pub use job_task::{JobTask, RollbackTask, StepError};
pub use listener::JobManagerListener;
