// Central Error Type for the Application

use crate::domain::JobId;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Job already submitted: {0}")]
    AlreadySubmitted(JobId),

    #[error("No tokio runtime available to run jobs")]
    NoRuntime,
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
