// Application Layer - Job handle, step runner and job manager

pub mod job;
pub mod manager;
pub mod worker;

// Re-exports
pub use job::{ControlRequest, Job, StepContext};
pub use manager::JobManager;
pub use worker::{execute_guarded, execute_guarded_async, PanicGuardResult};
