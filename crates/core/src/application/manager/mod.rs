// Job Manager - registry and scheduler of submitted jobs

mod listeners;

use crate::application::worker::{execute_guarded, PanicGuardResult};
use crate::application::Job;
use crate::domain::error::Result as DomainResult;
use crate::domain::JobOutcome;
use crate::error::{AppError, Result};
use crate::port::{JobManagerListener, JobTask};
use listeners::ListenerRegistry;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Default)]
struct JobLists {
    active: Vec<Job>,
    finished: Vec<Job>,
}

pub(crate) struct ManagerInner {
    runtime: Handle,
    lists: Mutex<JobLists>,
    listeners: ListenerRegistry,
    // Held while a membership change and its notifications are published,
    // so each change reaches listeners as one unit
    dispatch: ReentrantMutex<()>,
    active_count: watch::Sender<usize>,
}

/// Schedules submitted jobs, one tokio task each, and publishes every
/// active/finished list change to registered [`JobManagerListener`]s.
///
/// The manager is an explicit context object: build as many as needed, and
/// clone the handle freely.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    /// Create a manager spawning its jobs on `runtime`
    pub fn new(runtime: Handle) -> Self {
        let inner = ManagerInner {
            runtime,
            lists: Mutex::new(JobLists::default()),
            listeners: ListenerRegistry::default(),
            dispatch: ReentrantMutex::new(()),
            active_count: watch::channel(0).0,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create a manager on the runtime of the calling context
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| AppError::NoRuntime)
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Submit a `PreRun` job: it joins the active list, then runs on its
    /// own task until it reaches a terminal state.
    pub fn execute_job(&self, job: &Job) -> Result<()> {
        job.attach(&self.inner)?;
        let runner = match job.prepare() {
            Ok(runner) => runner,
            Err(e) => {
                job.detach();
                return Err(e.into());
            }
        };
        info!(job_id = %job.id(), name = %job.name(), "Job submitted");

        {
            let _dispatch = self.inner.dispatch.lock();
            self.inner.lists.lock().active.push(job.clone());
            self.notify(|listener| listener.job_added_to_active(self, job));
            self.publish_active_count();
        }

        self.spawn(job, runner.run());
        Ok(())
    }

    /// Bring an aborted job back into the active list and undo its steps.
    /// The job never sits in both lists: it leaves `finished` and joins
    /// `active` under one lock.
    pub(crate) fn roll_back_aborted(&self, job: &Job) -> DomainResult<()> {
        let _dispatch = self.inner.dispatch.lock();
        let runner = {
            let mut lists = self.inner.lists.lock();
            let runner = job.prepare_rollback()?;
            lists.finished.retain(|finished| finished != job);
            lists.active.push(job.clone());
            runner
        };
        info!(job_id = %job.id(), name = %job.name(), "Aborted job re-activated for rollback");
        self.notify(|listener| listener.job_added_to_active(self, job));
        self.publish_active_count();

        self.spawn(job, runner.run_rollback());
        Ok(())
    }

    /// Drive one run of `job` on its own task, then complete it
    fn spawn<F>(&self, job: &Job, run: F)
    where
        F: Future<Output = (Box<dyn JobTask>, JobOutcome)> + Send + 'static,
    {
        let manager = self.clone();
        let job = job.clone();
        let span = info_span!("job", job_id = %job.id(), name = %job.name());
        self.inner.runtime.spawn(
            async move {
                let (task, outcome) = run.await;
                manager.complete(&job, task, outcome);
            }
            .instrument(span),
        );
    }

    /// Move a job from active to finished and publish both changes
    fn complete(&self, job: &Job, task: Box<dyn JobTask>, outcome: JobOutcome) {
        if let Some(failure) = &outcome.failure {
            error!(job_id = %job.id(), name = %job.name(), %failure, "Job aborted by a failing step");
        }

        let _dispatch = self.inner.dispatch.lock();
        {
            let mut lists = self.inner.lists.lock();
            lists.active.retain(|active| active != job);
            job.shared().finalize(task, outcome);
            lists.finished.push(job.clone());
        }
        self.notify(|listener| listener.job_removed_from_active(self, job));
        self.notify(|listener| listener.job_added_to_finished(self, job));
        self.publish_active_count();
    }

    /// Snapshot of the submitted, non-terminal jobs
    pub fn active_jobs(&self) -> Vec<Job> {
        self.inner.lists.lock().active.clone()
    }

    /// Snapshot of the terminal jobs not yet cleared
    pub fn finished_jobs(&self) -> Vec<Job> {
        self.inner.lists.lock().finished.clone()
    }

    /// Drop every finished job; listeners get exactly one flush event
    pub fn clear_finished_jobs(&self) {
        let _dispatch = self.inner.dispatch.lock();
        let cleared = std::mem::take(&mut self.inner.lists.lock().finished);
        debug!(count = cleared.len(), "Finished jobs cleared");
        self.notify(|listener| listener.finished_jobs_flushed(self));
    }

    /// Register a listener. The manager only keeps a weak reference: the
    /// listener stops receiving events once its last `Arc` is dropped.
    pub fn add_listener<L: JobManagerListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn JobManagerListener> = weak;
        if !self.inner.listeners.add(weak) {
            debug!("Listener already registered");
        }
    }

    pub fn remove_listener<L: JobManagerListener + 'static>(&self, listener: &Arc<L>) {
        if !self.inner.listeners.remove(Arc::as_ptr(listener) as *const ()) {
            debug!("Listener was not registered");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Request rollback of a job; see [`Job::rollback`]. An aborted job
    /// rejoins the active list until its rollback completes.
    pub fn rollback_job(&self, job: &Job) -> Result<()> {
        job.rollback().map_err(AppError::from)
    }

    /// Cooperatively cancel every active job
    pub fn cancel_all(&self) {
        let active = self.active_jobs();
        if !active.is_empty() {
            info!(count = active.len(), "Cancelling all active jobs");
        }
        for job in active {
            job.cancel();
        }
    }

    /// Resolve once no job is active and its notifications were delivered
    pub async fn wait_idle(&self) {
        let mut count = self.inner.active_count.subscribe();
        if count.wait_for(|active| *active == 0).await.is_err() {
            warn!("Job manager closed while waiting for idle");
        }
    }

    /// Cancel everything and wait for the jobs to wind down
    pub async fn shutdown(&self) {
        self.cancel_all();
        self.wait_idle().await;
        info!("Job manager idle");
    }

    fn publish_active_count(&self) {
        let count = self.inner.lists.lock().active.len();
        self.inner.active_count.send_replace(count);
    }

    /// Deliver one event to a fresh listener snapshot
    fn notify(&self, event: impl Fn(&dyn JobManagerListener)) {
        for listener in self.inner.listeners.snapshot() {
            let delivery = AssertUnwindSafe(|| event(listener.as_ref()));
            if let PanicGuardResult::Panicked(msg) = execute_guarded(delivery) {
                warn!(panic_msg = %msg, "Job manager listener panicked");
            }
        }
    }
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.inner.lists.lock();
        f.debug_struct("JobManager")
            .field("active", &lists.active.len())
            .field("finished", &lists.finished.len())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainError, JobState};
    use crate::port::job_task::mocks::{MockTask, StepGate};
    use crate::port::listener::mocks::{ListenerEvent, RecordingListener};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_execute_runs_job_to_finished() {
        let manager = JobManager::current().expect("runtime");
        let listener = RecordingListener::new();
        manager.add_listener(&listener);

        let job = Job::new(MockTask::new("mock", 3));
        manager.execute_job(&job).expect("submit");
        assert!(job.manager().is_some());

        timeout(WAIT, manager.wait_idle()).await.expect("idle");

        assert_eq!(job.state(), JobState::Finished);
        assert!(manager.active_jobs().is_empty());
        assert_eq!(manager.finished_jobs(), vec![job.clone()]);
        assert_eq!(
            listener.events(),
            vec![
                ListenerEvent::AddedToActive(job.id()),
                ListenerEvent::RemovedFromActive(job.id()),
                ListenerEvent::AddedToFinished(job.id()),
            ]
        );
        assert_eq!(listener.consistency_violations(), 0);
    }

    #[tokio::test]
    async fn test_submit_twice_is_rejected() {
        let manager = JobManager::current().expect("runtime");
        let other = JobManager::current().expect("runtime");
        let job = Job::new(MockTask::new("mock", 1));

        manager.execute_job(&job).expect("submit");
        assert!(matches!(
            manager.execute_job(&job),
            Err(AppError::AlreadySubmitted(_))
        ));
        assert!(matches!(
            other.execute_job(&job),
            Err(AppError::AlreadySubmitted(_))
        ));

        timeout(WAIT, manager.wait_idle()).await.expect("idle");
        assert!(other.finished_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_started_job_cannot_be_submitted() {
        let manager = JobManager::current().expect("runtime");
        let job = Job::new(MockTask::new("mock", 1));
        job.run().await.expect("standalone run");

        let err = manager.execute_job(&job).unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidStateTransition { .. })
        ));
        assert!(job.manager().is_none());
        assert!(manager.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_clear_finished_fires_one_flush_even_when_empty() {
        let manager = JobManager::current().expect("runtime");
        let listener = RecordingListener::new();
        manager.add_listener(&listener);

        manager.clear_finished_jobs();
        manager.clear_finished_jobs();

        assert_eq!(
            listener.events(),
            vec![ListenerEvent::Flushed, ListenerEvent::Flushed]
        );
    }

    #[tokio::test]
    async fn test_dropped_listener_receives_nothing() {
        let manager = JobManager::current().expect("runtime");
        let listener = RecordingListener::new();
        manager.add_listener(&listener);
        assert_eq!(manager.listener_count(), 1);

        drop(listener);
        assert_eq!(manager.listener_count(), 0);
        manager.clear_finished_jobs();
    }

    struct Exploding;
    impl JobManagerListener for Exploding {
        fn job_added_to_active(&self, _manager: &JobManager, _job: &Job) {
            panic!("listener bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_break_dispatch() {
        let manager = JobManager::current().expect("runtime");
        let exploding = Arc::new(Exploding);
        let listener = RecordingListener::new();
        manager.add_listener(&exploding);
        manager.add_listener(&listener);

        let job = Job::new(MockTask::new("mock", 1));
        manager.execute_job(&job).expect("submit");
        timeout(WAIT, manager.wait_idle()).await.expect("idle");

        assert_eq!(listener.events().len(), 3);
        assert_eq!(job.state(), JobState::Finished);
    }

    /// Submits a follow-up job from inside a callback
    struct Chaining {
        follow_up: Job,
        submitted: AtomicUsize,
    }

    impl JobManagerListener for Chaining {
        fn job_added_to_finished(&self, manager: &JobManager, job: &Job) {
            assert!(manager.finished_jobs().contains(job));
            if self.submitted.fetch_add(1, Ordering::SeqCst) == 0 {
                manager
                    .execute_job(&self.follow_up)
                    .expect("reentrant submit");
            }
        }
    }

    #[tokio::test]
    async fn test_reentrant_submit_from_callback() {
        let manager = JobManager::current().expect("runtime");
        let follow_up = Job::new(MockTask::new("follow-up", 1));
        let chaining = Arc::new(Chaining {
            follow_up: follow_up.clone(),
            submitted: AtomicUsize::new(0),
        });
        manager.add_listener(&chaining);

        let first = Job::new(MockTask::new("first", 1));
        manager.execute_job(&first).expect("submit");

        timeout(WAIT, follow_up.wait_for_final())
            .await
            .expect("follow-up finished");
        timeout(WAIT, manager.wait_idle()).await.expect("idle");
        assert_eq!(manager.finished_jobs().len(), 2);
    }

    /// Hands events to another task instead of waiting on it
    struct Forwarding {
        events: tokio::sync::mpsc::UnboundedSender<Job>,
    }

    impl JobManagerListener for Forwarding {
        fn job_added_to_finished(&self, _manager: &JobManager, job: &Job) {
            let _ = self.events.send(job.clone());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_callbacks_hand_off_to_a_thread_using_the_manager() {
        let manager = JobManager::current().expect("runtime");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let forwarding = Arc::new(Forwarding { events: tx });
        manager.add_listener(&forwarding);

        // The consumer calls into the manager for every event it receives
        let consumer = tokio::spawn({
            let manager = manager.clone();
            async move {
                let mut seen = 0;
                while let Some(job) = rx.recv().await {
                    assert!(job.state().is_final());
                    assert!(!manager.active_jobs().contains(&job));
                    manager.clear_finished_jobs();
                    seen += 1;
                    if seen == 8 {
                        break;
                    }
                }
                seen
            }
        });

        for i in 0..8 {
            manager
                .execute_job(&Job::new(MockTask::new(format!("job-{}", i), 3)))
                .expect("submit");
        }
        timeout(WAIT, manager.wait_idle()).await.expect("idle");
        let seen = timeout(WAIT, consumer)
            .await
            .expect("consumer done")
            .expect("join");
        assert_eq!(seen, 8);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_jobs() {
        let manager = JobManager::current().expect("runtime");
        let gate = StepGate::new();
        let job = Job::new(MockTask::new("blocked", 10).gated(gate.clone()));
        manager.execute_job(&job).expect("submit");
        gate.entered().await;

        manager.cancel_all();
        gate.release(1);

        timeout(WAIT, manager.shutdown()).await.expect("shutdown");
        assert_eq!(job.state(), JobState::Aborted);
        assert_eq!(manager.finished_jobs().len(), 1);
    }
}
