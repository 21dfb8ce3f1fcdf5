// Job handle - shared, observable state of one steppable unit of work

mod context;
mod control;

pub use context::StepContext;
pub use control::ControlRequest;
pub(crate) use control::ControlToken;

use crate::application::manager::{JobManager, ManagerInner};
use crate::application::worker::StepRunner;
use crate::domain::error::Result as DomainResult;
use crate::domain::{DomainError, JobId, JobOutcome, JobState, OutcomeKind, StepFailure};
use crate::error::AppError;
use crate::port::JobTask;
use chrono::{DateTime, Utc};
use control::{control_channel, ControlSender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
struct Timeline {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// State shared between the handle, the runner and the step context.
///
/// Only the job's own runner writes state, percentage and description while
/// it runs; everyone else reads.
pub(crate) struct JobShared {
    pub(crate) id: JobId,
    pub(crate) name: String,
    supports_rollback: bool,
    state: watch::Sender<JobState>,
    percentage: AtomicU8,
    description: RwLock<String>,
    rolling_back: AtomicBool,
    timeline: RwLock<Timeline>,
    outcome: RwLock<Option<JobOutcome>>,
    pub(crate) control: ControlSender,
    // Empty while the runner owns the task
    task: Mutex<Option<Box<dyn JobTask>>>,
    manager: Mutex<Option<Weak<ManagerInner>>>,
}

impl JobShared {
    pub(crate) fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Move to `next` if the lifecycle allows it
    pub(crate) fn transition(&self, next: JobState) -> DomainResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                result = Err(DomainError::InvalidStateTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Re-enter `Running` from `Aborted` to undo the aborted run. Only the
    /// rollback path uses this; `Finished` stays terminal.
    pub(crate) fn reopen_for_rollback(&self) -> DomainResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if *current == JobState::Aborted {
                *current = JobState::Running;
                true
            } else {
                result = Err(DomainError::InvalidStateTransition {
                    from: *current,
                    to: JobState::Running,
                });
                false
            }
        });
        result
    }

    fn is_rolled_back(&self) -> bool {
        matches!(
            self.outcome.read().as_ref(),
            Some(outcome) if outcome.kind == OutcomeKind::RolledBack
        )
    }

    pub(crate) fn description(&self) -> String {
        self.description.read().clone()
    }

    pub(crate) fn set_description(&self, description: String) {
        *self.description.write() = description;
    }

    pub(crate) fn publish_percentage(&self, percentage: u8) {
        self.percentage.store(percentage.min(100), Ordering::Release);
    }

    pub(crate) fn set_rolling_back(&self, rolling_back: bool) {
        self.rolling_back.store(rolling_back, Ordering::Release);
    }

    pub(crate) fn check_state(&self, expected: JobState) -> DomainResult<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(DomainError::InvalidStateTransition {
                from: state,
                to: expected,
            })
        }
    }

    pub(crate) fn check_config_state(&self) -> DomainResult<()> {
        let state = self.state();
        if state == JobState::PreRun {
            Ok(())
        } else {
            Err(DomainError::ConfigurationAfterStart { job: self.id, state })
        }
    }

    /// Record the outcome, hand the task back to the handle and enter the
    /// terminal state. The state change comes last so anyone woken by it
    /// sees the outcome.
    pub(crate) fn finalize(&self, task: Box<dyn JobTask>, outcome: JobOutcome) {
        let terminal = outcome.final_state();
        self.publish_percentage(task.percentage());
        *self.task.lock() = Some(task);
        self.set_rolling_back(false);
        self.timeline.write().finished_at = Some(Utc::now());
        *self.outcome.write() = Some(outcome);
        if let Err(e) = self.transition(terminal) {
            warn!(job_id = %self.id, error = %e, "Job could not enter its terminal state");
        }
    }

    pub(crate) fn control_token(&self) -> ControlToken {
        self.control.token()
    }
}

/// A steppable, observable, optionally reversible unit of work.
///
/// `Job` is a cheap handle: clones refer to the same job, and equality and
/// hashing go by [`JobId`]. The concrete work lives in a boxed [`JobTask`].
#[derive(Clone)]
pub struct Job {
    shared: Arc<JobShared>,
}

impl Job {
    pub fn new<T: JobTask>(task: T) -> Self {
        Self::from_boxed(Box::new(task))
    }

    pub fn from_boxed(mut task: Box<dyn JobTask>) -> Self {
        let supports_rollback = task.as_rollback().is_some();
        let shared = JobShared {
            id: JobId::new(),
            name: task.name(),
            supports_rollback,
            state: watch::channel(JobState::PreRun).0,
            percentage: AtomicU8::new(task.percentage().min(100)),
            description: RwLock::new(String::new()),
            rolling_back: AtomicBool::new(false),
            timeline: RwLock::new(Timeline::default()),
            outcome: RwLock::new(None),
            control: control_channel(),
            task: Mutex::new(Some(task)),
            manager: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Completion estimate in [0,100], as published after the last step
    pub fn percentage(&self) -> u8 {
        self.shared.percentage.load(Ordering::Acquire)
    }

    pub fn description(&self) -> String {
        self.shared.description()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.shared.set_description(description.into());
    }

    pub fn supports_rollback(&self) -> bool {
        self.shared.supports_rollback
    }

    /// True while the runner is undoing steps
    pub fn is_rolling_back(&self) -> bool {
        self.shared.rolling_back.load(Ordering::Acquire)
    }

    /// Requests not yet acted upon by the runner
    pub fn pending_requests(&self) -> ControlRequest {
        self.shared.control.current()
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.shared.outcome.read().clone()
    }

    /// Failure captured from a step, if the job was aborted by one
    pub fn failure(&self) -> Option<StepFailure> {
        self.shared
            .outcome
            .read()
            .as_ref()
            .and_then(|outcome| outcome.failure.clone())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.shared.timeline.read().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.shared.timeline.read().finished_at
    }

    /// Manager this job was submitted to, if it is still alive
    pub fn manager(&self) -> Option<JobManager> {
        self.shared
            .manager
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(JobManager::from_inner)
    }

    pub fn check_state(&self, expected: JobState) -> DomainResult<()> {
        self.shared.check_state(expected)
    }

    pub fn check_config_state(&self) -> DomainResult<()> {
        self.shared.check_config_state()
    }

    /// Run a configuration setter on the concrete task.
    ///
    /// Only legal while the job is in `PreRun`; afterwards it fails with
    /// [`DomainError::ConfigurationAfterStart`] and `f` is not called.
    pub fn configure<T: JobTask, R>(&self, f: impl FnOnce(&mut T) -> R) -> DomainResult<R> {
        let mut slot = self.shared.task.lock();
        self.shared.check_config_state()?;
        let task = slot
            .as_mut()
            .and_then(|task| (**task).downcast_mut::<T>())
            .ok_or(DomainError::TaskTypeMismatch {
                job: self.shared.id,
                expected: std::any::type_name::<T>(),
            })?;
        let result = f(task);
        self.shared.publish_percentage(task.percentage());
        Ok(result)
    }

    /// Read the concrete task while no runner owns it (before start or once terminal)
    pub fn inspect<T: JobTask, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slot = self.shared.task.lock();
        slot.as_ref()
            .and_then(|task| (**task).downcast_ref::<T>())
            .map(f)
    }

    /// Ask a running job to pause at the next step boundary
    pub fn suspend(&self) {
        match self.state() {
            JobState::Running => {
                debug!(job_id = %self.id(), "Suspend requested");
                self.shared.control.update(|request| request.suspend = true);
            }
            state => debug!(job_id = %self.id(), %state, "Ignoring suspend request"),
        }
    }

    pub fn resume(&self) {
        let state = self.state();
        if state.is_final() {
            debug!(job_id = %self.id(), %state, "Ignoring resume request");
            return;
        }
        debug!(job_id = %self.id(), "Resume requested");
        self.shared.control.update(|request| request.suspend = false);
    }

    /// Cooperative cancellation: the step in progress finishes, then the job
    /// is aborted. A request made before start aborts it before its first step.
    pub fn cancel(&self) {
        let state = self.state();
        if state.is_final() {
            debug!(job_id = %self.id(), %state, "Ignoring cancel request");
            return;
        }
        info!(job_id = %self.id(), name = %self.name(), "Cancellation requested");
        self.shared.control.update(|request| request.cancel = true);
    }

    pub fn abort(&self) {
        self.cancel();
    }

    /// Undo the job's completed steps.
    ///
    /// On a live job, forward work stops at the next boundary; a suspended
    /// job is woken and a pending cancel is superseded. On an `Aborted` job
    /// the rollback path is started again: by its manager when it has one,
    /// otherwise by the caller through [`Job::run_rollback`]. `Finished` jobs
    /// and jobs already rolled back are rejected.
    pub fn rollback(&self) -> DomainResult<()> {
        if !self.supports_rollback() {
            return Err(DomainError::RollbackUnsupported { job: self.id() });
        }
        let state = self.state();
        if state == JobState::Finished || self.shared.is_rolled_back() {
            return Err(DomainError::InvalidStateTransition {
                from: state,
                to: JobState::Running,
            });
        }
        info!(job_id = %self.id(), name = %self.name(), %state, "Rollback requested");
        self.shared.control.update(|request| {
            request.rollback = true;
            request.cancel = false;
            request.suspend = false;
        });
        if state != JobState::Aborted {
            return Ok(());
        }
        match self.manager() {
            Some(manager) => manager.roll_back_aborted(self),
            None => {
                debug!(job_id = %self.id(), "Standalone job, waiting for run_rollback");
                Ok(())
            }
        }
    }

    /// Watch every state change of this job
    pub fn subscribe_state(&self) -> watch::Receiver<JobState> {
        self.shared.state.subscribe()
    }

    /// Resolve with the terminal state once the job has one
    pub async fn wait_for_final(&self) -> JobState {
        let mut rx = self.subscribe_state();
        let reached = rx.wait_for(|state| state.is_final()).await.map(|state| *state);
        reached.unwrap_or_else(|_| self.state())
    }

    /// Drive the job to completion on the current task, without a manager
    pub async fn run(&self) -> DomainResult<JobOutcome> {
        let runner = self.prepare()?;
        let (task, outcome) = runner.run().await;
        self.shared.finalize(task, outcome.clone());
        Ok(outcome)
    }

    /// Drive the rollback of an `Aborted` job on the current task, without a manager
    pub async fn run_rollback(&self) -> DomainResult<JobOutcome> {
        let runner = self.prepare_rollback()?;
        let (task, outcome) = runner.run_rollback().await;
        self.shared.finalize(task, outcome.clone());
        Ok(outcome)
    }

    /// Claim the task and enter `Running`. Fails if the job already started.
    pub(crate) fn prepare(&self) -> DomainResult<StepRunner> {
        let mut slot = self.shared.task.lock();
        let state = self.state();
        let task = match slot.take() {
            Some(task) if state.can_transition_to(JobState::Running) => task,
            other => {
                *slot = other;
                return Err(DomainError::InvalidStateTransition {
                    from: state,
                    to: JobState::Running,
                });
            }
        };
        if let Err(e) = self.shared.transition(JobState::Running) {
            *slot = Some(task);
            return Err(e);
        }
        self.shared.timeline.write().started_at = Some(Utc::now());
        Ok(StepRunner::new(Arc::clone(&self.shared), task))
    }

    /// Claim the task of an `Aborted`, reversible job and reopen it for rollback
    pub(crate) fn prepare_rollback(&self) -> DomainResult<StepRunner> {
        if !self.supports_rollback() {
            return Err(DomainError::RollbackUnsupported { job: self.id() });
        }
        let mut slot = self.shared.task.lock();
        let state = self.state();
        let task = match slot.take() {
            Some(task) if state == JobState::Aborted && !self.shared.is_rolled_back() => task,
            other => {
                *slot = other;
                return Err(DomainError::InvalidStateTransition {
                    from: state,
                    to: JobState::Running,
                });
            }
        };
        self.shared.control.update(|request| {
            request.rollback = true;
            request.cancel = false;
            request.suspend = false;
        });
        if let Err(e) = self.shared.reopen_for_rollback() {
            *slot = Some(task);
            return Err(e);
        }
        self.shared.set_rolling_back(true);
        self.shared.timeline.write().finished_at = None;
        *self.shared.outcome.write() = None;
        Ok(StepRunner::new(Arc::clone(&self.shared), task))
    }

    pub(crate) fn shared(&self) -> &Arc<JobShared> {
        &self.shared
    }

    pub(crate) fn attach(&self, manager: &Arc<ManagerInner>) -> Result<(), AppError> {
        let mut slot = self.shared.manager.lock();
        if slot.is_some() {
            return Err(AppError::AlreadySubmitted(self.id()));
        }
        *slot = Some(Arc::downgrade(manager));
        Ok(())
    }

    pub(crate) fn detach(&self) {
        *self.shared.manager.lock() = None;
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("percentage", &self.percentage())
            .finish()
    }
}
