// How a job's step loop ended

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal kind reached by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// `next_step` reported completion
    Finished,
    /// Cancelled, or a step failed
    Aborted,
    /// Rollback ran to completion; the job's effects are undone
    RolledBack,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Finished => write!(f, "finished"),
            OutcomeKind::Aborted => write!(f, "aborted"),
            OutcomeKind::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// A failure captured from a step, kept for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    /// True when the step panicked instead of returning an error
    pub panicked: bool,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "step panicked: {}", self.message)
        } else {
            write!(f, "step failed: {}", self.message)
        }
    }
}

/// Outcome handed to `post_execution` and recorded on the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub kind: OutcomeKind,
    pub failure: Option<StepFailure>,
}

impl JobOutcome {
    pub fn finished() -> Self {
        Self {
            kind: OutcomeKind::Finished,
            failure: None,
        }
    }

    pub fn aborted() -> Self {
        Self {
            kind: OutcomeKind::Aborted,
            failure: None,
        }
    }

    pub fn rolled_back() -> Self {
        Self {
            kind: OutcomeKind::RolledBack,
            failure: None,
        }
    }

    pub fn failed(failure: StepFailure) -> Self {
        Self {
            kind: OutcomeKind::Aborted,
            failure: Some(failure),
        }
    }

    /// Terminal `JobState` this outcome maps to
    pub fn final_state(&self) -> super::JobState {
        match self.kind {
            OutcomeKind::Finished => super::JobState::Finished,
            OutcomeKind::Aborted | OutcomeKind::RolledBack => super::JobState::Aborted,
        }
    }
}
