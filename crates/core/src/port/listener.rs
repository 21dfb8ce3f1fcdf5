// Job Manager Listener Port
// Observer capability consumed by the presentation layer

use crate::application::{Job, JobManager};

/// Receives every active/finished list change of a [`JobManager`].
///
/// Callbacks run synchronously on the context that caused the change (often a
/// job's worker task), so they should stay short. Calling back into the
/// manager from a callback is allowed, including (un)registering listeners.
///
/// Every callback runs while the manager's dispatch lock is held, and other
/// threads submitting, completing or clearing jobs wait on that lock. A
/// callback must therefore never block on another thread that itself uses
/// the manager, such as a synchronous hop to a UI thread: hand the event off
/// through a channel instead.
///
/// For one job's completion, `job_removed_from_active` is always delivered
/// before `job_added_to_finished`. Nothing is promised across different jobs.
/// An aborted job taken back for rollback gets `job_added_to_active` again,
/// followed by the usual pair once the rollback ends.
pub trait JobManagerListener: Send + Sync {
    fn job_added_to_active(&self, _manager: &JobManager, _job: &Job) {}

    fn job_removed_from_active(&self, _manager: &JobManager, _job: &Job) {}

    fn job_added_to_finished(&self, _manager: &JobManager, _job: &Job) {}

    /// Fired once per `clear_finished_jobs` call, even when nothing was cleared
    fn finished_jobs_flushed(&self, _manager: &JobManager) {}
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::JobId;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;

    /// One delivered notification
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ListenerEvent {
        AddedToActive(JobId),
        RemovedFromActive(JobId),
        AddedToFinished(JobId),
        Flushed,
    }

    /// Records every event and checks, at delivery time, that the job sits
    /// in exactly one of the manager's lists.
    pub struct RecordingListener {
        events: Mutex<Vec<ListenerEvent>>,
        delivered: watch::Sender<usize>,
        violations: AtomicUsize,
        /// Unregister itself while handling the event with this index
        unregister_at: Option<usize>,
        this: Mutex<Option<std::sync::Weak<RecordingListener>>>,
    }

    impl RecordingListener {
        pub fn new() -> Arc<Self> {
            Self::build(None)
        }

        /// A listener that removes itself from the manager inside the
        /// callback for its `index`-th event (0-based)
        pub fn unregistering_at(index: usize) -> Arc<Self> {
            Self::build(Some(index))
        }

        fn build(unregister_at: Option<usize>) -> Arc<Self> {
            let listener = Arc::new(Self {
                events: Mutex::new(Vec::new()),
                delivered: watch::channel(0).0,
                violations: AtomicUsize::new(0),
                unregister_at,
                this: Mutex::new(None),
            });
            *listener.this.lock() = Some(Arc::downgrade(&listener));
            listener
        }

        pub fn events(&self) -> Vec<ListenerEvent> {
            self.events.lock().clone()
        }

        pub fn consistency_violations(&self) -> usize {
            self.violations.load(Ordering::SeqCst)
        }

        /// Resolve once at least `count` events were delivered
        pub async fn wait_for_events(&self, count: usize) {
            let mut delivered = self.delivered.subscribe();
            let _ = delivered.wait_for(|n| *n >= count).await;
        }

        fn record(&self, manager: &JobManager, event: ListenerEvent, job: Option<&Job>) {
            if let Some(job) = job {
                let active = manager.active_jobs().contains(job);
                let finished = manager.finished_jobs().contains(job);
                if active == finished {
                    self.violations.fetch_add(1, Ordering::SeqCst);
                }
            }
            let index = {
                let mut events = self.events.lock();
                events.push(event);
                events.len() - 1
            };
            if self.unregister_at == Some(index) {
                if let Some(this) = self.this.lock().as_ref().and_then(|w| w.upgrade()) {
                    manager.remove_listener(&this);
                }
            }
            self.delivered.send_replace(index + 1);
        }
    }

    impl JobManagerListener for RecordingListener {
        fn job_added_to_active(&self, manager: &JobManager, job: &Job) {
            self.record(manager, ListenerEvent::AddedToActive(job.id()), Some(job));
        }

        fn job_removed_from_active(&self, manager: &JobManager, job: &Job) {
            self.record(manager, ListenerEvent::RemovedFromActive(job.id()), Some(job));
        }

        fn job_added_to_finished(&self, manager: &JobManager, job: &Job) {
            self.record(manager, ListenerEvent::AddedToFinished(job.id()), Some(job));
        }

        fn finished_jobs_flushed(&self, manager: &JobManager) {
            self.record(manager, ListenerEvent::Flushed, None);
        }
    }
}
