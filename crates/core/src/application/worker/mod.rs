// Step Runner - drives one job's step loop

mod panic_guard;

pub use panic_guard::{execute_guarded, execute_guarded_async, PanicGuardResult};

use crate::application::job::{ControlRequest, ControlToken, JobShared, StepContext};
use crate::domain::{JobOutcome, JobState, StepFailure};
use crate::port::{JobTask, StepError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Decision taken between two steps
#[derive(Debug, PartialEq, Eq)]
enum Boundary {
    Continue,
    Cancel,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Owns a job's task while it runs.
///
/// Hooks are called strictly one after another: `pre_execution`, then
/// `next_step` (or `next_rollback_step`) with a boundary check before every
/// call, then `post_execution` exactly once.
pub(crate) struct StepRunner {
    shared: Arc<JobShared>,
    task: Box<dyn JobTask>,
    control: ControlToken,
    ctx: StepContext,
}

impl StepRunner {
    pub(crate) fn new(shared: Arc<JobShared>, task: Box<dyn JobTask>) -> Self {
        let control = shared.control_token();
        let ctx = StepContext::new(Arc::clone(&shared));
        Self {
            shared,
            task,
            control,
            ctx,
        }
    }

    /// Run the job to its outcome and hand the task back
    pub(crate) async fn run(mut self) -> (Box<dyn JobTask>, JobOutcome) {
        info!(job_id = %self.shared.id, name = %self.shared.name, "Job started");
        let outcome = self.drive().await;
        self.conclude(outcome).await
    }

    /// Undo the steps of an aborted run. Forward stepping is not resumed.
    pub(crate) async fn run_rollback(mut self) -> (Box<dyn JobTask>, JobOutcome) {
        info!(job_id = %self.shared.id, name = %self.shared.name, "Rollback of aborted job started");
        let outcome = self.roll_back().await;
        self.conclude(outcome).await
    }

    /// `post_execution` for the outcome reached, exactly once per run
    async fn conclude(mut self, outcome: JobOutcome) -> (Box<dyn JobTask>, JobOutcome) {
        if let PanicGuardResult::Panicked(msg) =
            execute_guarded_async(self.task.post_execution(&self.ctx, &outcome)).await
        {
            error!(job_id = %self.shared.id, panic_msg = %msg, "post_execution panicked");
        }
        self.publish_percentage();

        match &outcome.failure {
            Some(failure) => error!(
                job_id = %self.shared.id,
                outcome = %outcome.kind,
                failure = %failure,
                "Job ended with a failure"
            ),
            None => info!(job_id = %self.shared.id, outcome = %outcome.kind, "Job ended"),
        }
        (self.task, outcome)
    }

    async fn drive(&mut self) -> JobOutcome {
        if let Err(failure) = guard(self.task.pre_execution(&self.ctx)).await {
            error!(job_id = %self.shared.id, %failure, "pre_execution failed");
            return JobOutcome::failed(failure);
        }
        self.publish_percentage();

        loop {
            match self.boundary(Direction::Forward).await {
                Boundary::Continue => {}
                Boundary::Cancel => {
                    info!(job_id = %self.shared.id, "Job cancelled at step boundary");
                    return JobOutcome::aborted();
                }
                Boundary::Rollback => return self.roll_back().await,
            }

            let result = guard(self.task.next_step(&self.ctx)).await;
            self.publish_percentage();

            match result {
                // A pending cancel or rollback wins over completion
                Ok(true) if !self.has_stop_request() => return JobOutcome::finished(),
                Ok(_) => {}
                Err(failure) => return JobOutcome::failed(failure),
            }
        }
    }

    async fn roll_back(&mut self) -> JobOutcome {
        info!(job_id = %self.shared.id, "Rolling back job");
        self.shared.set_rolling_back(true);
        if self.shared.state() == JobState::Suspended {
            self.enter(JobState::Running);
        }

        loop {
            if self.boundary(Direction::Backward).await == Boundary::Cancel {
                warn!(job_id = %self.shared.id, "Rollback cancelled before completion");
                return JobOutcome::aborted();
            }

            let Some(rollback) = self.task.as_rollback() else {
                return JobOutcome::failed(StepFailure {
                    message: "task lost its rollback capability".to_string(),
                    panicked: false,
                });
            };
            let result = guard(rollback.next_rollback_step(&self.ctx)).await;
            self.publish_percentage();

            match result {
                Ok(true) => return JobOutcome::rolled_back(),
                Ok(false) => {}
                Err(failure) => return JobOutcome::failed(failure),
            }
        }
    }

    /// Apply pending requests between two steps. Parks here while suspended.
    async fn boundary(&mut self, direction: Direction) -> Boundary {
        loop {
            let request = self.control.current();

            if request.rollback && direction == Direction::Forward {
                return Boundary::Rollback;
            }
            if request.cancel {
                return Boundary::Cancel;
            }
            if !request.suspend {
                if self.shared.state() == JobState::Suspended {
                    info!(job_id = %self.shared.id, "Job resumed");
                    self.enter(JobState::Running);
                }
                return Boundary::Continue;
            }

            if self.shared.state() == JobState::Running {
                info!(job_id = %self.shared.id, "Job suspended");
                self.enter(JobState::Suspended);
            }
            self.control.changed().await;
        }
    }

    fn has_stop_request(&self) -> bool {
        let ControlRequest {
            cancel, rollback, ..
        } = self.shared.control.current();
        cancel || rollback
    }

    fn enter(&self, state: JobState) {
        if let Err(e) = self.shared.transition(state) {
            debug!(job_id = %self.shared.id, error = %e, "Skipped state change");
        }
    }

    fn publish_percentage(&self) {
        self.shared.publish_percentage(self.task.percentage());
    }
}

/// Run one hook with panic isolation, folding errors and panics into a failure
async fn guard<F, T>(future: F) -> Result<T, StepFailure>
where
    F: std::future::Future<Output = Result<T, StepError>>,
{
    match execute_guarded_async(future).await {
        PanicGuardResult::Success(Ok(value)) => Ok(value),
        PanicGuardResult::Success(Err(e)) => Err(StepFailure {
            message: e.to_string(),
            panicked: false,
        }),
        PanicGuardResult::Panicked(message) => Err(StepFailure {
            message,
            panicked: true,
        }),
    }
}
