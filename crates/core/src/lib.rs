// Mediajobs Core - Job framework, domain & ports
// NO infrastructure dependencies: concrete jobs live in their own crates

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{Job, JobManager, StepContext};
pub use domain::{DomainError, JobId, JobOutcome, JobState, OutcomeKind, StepFailure};
pub use error::{AppError, Result};
pub use port::{JobManagerListener, JobTask, RollbackTask, StepError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
