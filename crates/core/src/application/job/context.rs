// Step Context - what a running task may see and touch of its own job

use super::JobShared;
use crate::domain::error::Result as DomainResult;
use crate::domain::{JobId, JobState};
use std::sync::Arc;

/// Handed to every `JobTask` hook. Lets the task publish progress text and
/// peek at pending cancellation without owning the job handle.
#[derive(Clone)]
pub struct StepContext {
    shared: Arc<JobShared>,
}

impl StepContext {
    pub(crate) fn new(shared: Arc<JobShared>) -> Self {
        Self { shared }
    }

    pub fn job_id(&self) -> JobId {
        self.shared.id
    }

    pub fn job_name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    pub fn description(&self) -> String {
        self.shared.description()
    }

    /// Replace the job's status line, e.g. "importing 3/10"
    pub fn set_description(&self, description: impl Into<String>) {
        self.shared.set_description(description.into());
    }

    /// True once cancellation was requested. A long step may use this to
    /// return early; the job is aborted at the boundary either way.
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.control.current().cancel
    }

    /// Fails unless the job is in `expected`
    pub fn check_state(&self, expected: JobState) -> DomainResult<()> {
        self.shared.check_state(expected)
    }

    /// Fails unless the job is still configurable (`PreRun`)
    pub fn check_config_state(&self) -> DomainResult<()> {
        self.shared.check_config_state()
    }
}
