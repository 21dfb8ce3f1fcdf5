// Job identity and lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Job ID (UUID v4), assigned once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Job State
///
/// `Aborted` and `Finished` are terminal for ordinary lifecycle moves. The one
/// exit is rollback of an `Aborted` job, which reopens it as `Running` outside
/// of [`JobState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Built and possibly configured, not started yet
    PreRun,
    Running,
    Suspended,
    Aborted,
    Finished,
}

impl JobState {
    pub fn is_final(self) -> bool {
        matches!(self, JobState::Aborted | JobState::Finished)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (PreRun, Running)
                | (Running, Suspended)
                | (Running, Finished)
                | (Running, Aborted)
                | (Suspended, Running)
                | (Suspended, Aborted)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::PreRun => write!(f, "PRE_RUN"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Suspended => write!(f, "SUSPENDED"),
            JobState::Aborted => write!(f, "ABORTED"),
            JobState::Finished => write!(f, "FINISHED"),
        }
    }
}
