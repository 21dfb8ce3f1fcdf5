// Job Task Port
// Capability surface implemented by concrete jobs (import, delete, rename, ...)

use crate::application::StepContext;
use crate::domain::JobOutcome;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use thiserror::Error;

/// A fatal failure of one step. The job is aborted when a step returns it.
///
/// Skippable failures never reach the framework: the task logs them and
/// moves on to its next unit within `next_step`.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StepError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(err.to_string(), err)
    }
}

/// A steppable unit of work.
///
/// The framework calls the hooks strictly sequentially for one task:
/// `pre_execution` once, `next_step` until it returns `Ok(true)` (or the job
/// is cancelled / rolled back), then `post_execution` exactly once.
/// Suspend and cancel requests are only honored between two calls, so one
/// step should stay short.
#[async_trait]
pub trait JobTask: Downcast + Send + 'static {
    /// Human-readable job name, read once when the job is built
    fn name(&self) -> String;

    /// Derive internal working state from configuration
    async fn pre_execution(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Perform one increment of work. `Ok(true)` means the work is complete.
    async fn next_step(&mut self, ctx: &StepContext) -> Result<bool, StepError>;

    /// Finalize the description for the terminal outcome
    async fn post_execution(&mut self, _ctx: &StepContext, _outcome: &JobOutcome) {}

    /// Completion estimate in [0,100]; 100 when there is nothing to do
    fn percentage(&self) -> u8;

    /// Rollback capability, `None` for jobs that cannot undo their work
    fn as_rollback(&mut self) -> Option<&mut dyn RollbackTask> {
        None
    }
}

impl_downcast!(JobTask);

/// Reverse stepping for jobs that can undo their increments
#[async_trait]
pub trait RollbackTask: Send {
    /// Undo one previously performed increment. `Ok(true)` when nothing is left to undo.
    async fn next_rollback_step(&mut self, ctx: &StepContext) -> Result<bool, StepError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::{Notify, Semaphore};

    /// What happens when the mock reaches `fail_at`
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Return a `StepError`
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Holds each step until the test releases it
    #[derive(Debug)]
    pub struct StepGate {
        permits: Semaphore,
        entered: Notify,
    }

    impl StepGate {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                permits: Semaphore::new(0),
                entered: Notify::new(),
            })
        }

        /// Let `n` blocked (or future) steps return
        pub fn release(&self, n: usize) {
            self.permits.add_permits(n);
        }

        /// Resolve once a step is blocked on the gate
        pub async fn entered(&self) {
            self.entered.notified().await;
        }

        async fn pass(&self) {
            self.entered.notify_one();
            if let Ok(permit) = self.permits.acquire().await {
                permit.forget();
            }
        }
    }

    /// Counters shared between a mock task and the test observing it
    #[derive(Debug, Default)]
    pub struct MockCounters {
        /// Units currently applied (forward steps minus rollback steps)
        pub applied: AtomicUsize,
        pub pre_calls: AtomicUsize,
        pub post_calls: AtomicUsize,
    }

    /// Mock task processing `total` units, one per step
    pub struct MockTask {
        name: String,
        total: usize,
        done: usize,
        reversible: bool,
        fail_at: Option<(usize, MockBehavior)>,
        gate: Option<Arc<StepGate>>,
        counters: Arc<MockCounters>,
    }

    impl MockTask {
        pub fn new(name: impl Into<String>, total: usize) -> Self {
            Self {
                name: name.into(),
                total,
                done: 0,
                reversible: false,
                fail_at: None,
                gate: None,
                counters: Arc::new(MockCounters::default()),
            }
        }

        pub fn reversible(mut self) -> Self {
            self.reversible = true;
            self
        }

        /// Misbehave on the step processing unit `index` (0-based)
        pub fn fail_at(mut self, index: usize, behavior: MockBehavior) -> Self {
            self.fail_at = Some((index, behavior));
            self
        }

        pub fn gated(mut self, gate: Arc<StepGate>) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn counters(&self) -> Arc<MockCounters> {
            Arc::clone(&self.counters)
        }

        /// Configuration setter, only reachable through `Job::configure`
        pub fn set_total(&mut self, total: usize) {
            self.total = total;
        }

        pub fn total(&self) -> usize {
            self.total
        }

        pub fn done(&self) -> usize {
            self.done
        }
    }

    #[async_trait]
    impl JobTask for MockTask {
        fn name(&self) -> String {
            self.name.clone()
        }

        async fn pre_execution(&mut self, ctx: &StepContext) -> Result<(), StepError> {
            self.counters.pre_calls.fetch_add(1, Ordering::SeqCst);
            ctx.set_description(format!("{}: 0/{}", self.name, self.total));
            Ok(())
        }

        async fn next_step(&mut self, ctx: &StepContext) -> Result<bool, StepError> {
            if self.done >= self.total {
                return Ok(true);
            }
            if let Some(gate) = &self.gate {
                gate.pass().await;
            }
            if let Some((index, behavior)) = &self.fail_at {
                if *index == self.done {
                    match behavior {
                        MockBehavior::Fail(msg) => return Err(StepError::new(msg.clone())),
                        MockBehavior::Panic(msg) => panic!("{}", msg),
                    }
                }
            }
            self.done += 1;
            self.counters.applied.fetch_add(1, Ordering::SeqCst);
            ctx.set_description(format!("{}: {}/{}", self.name, self.done, self.total));
            Ok(self.done >= self.total)
        }

        async fn post_execution(&mut self, ctx: &StepContext, outcome: &JobOutcome) {
            self.counters.post_calls.fetch_add(1, Ordering::SeqCst);
            ctx.set_description(format!("{} {}: {}/{}", self.name, outcome.kind, self.done, self.total));
        }

        fn percentage(&self) -> u8 {
            if self.total == 0 {
                return 100;
            }
            ((self.done * 100) / self.total).min(100) as u8
        }

        fn as_rollback(&mut self) -> Option<&mut dyn RollbackTask> {
            if self.reversible {
                Some(self)
            } else {
                None
            }
        }
    }

    #[async_trait]
    impl RollbackTask for MockTask {
        async fn next_rollback_step(&mut self, ctx: &StepContext) -> Result<bool, StepError> {
            if self.done == 0 {
                return Ok(true);
            }
            if let Some(gate) = &self.gate {
                gate.pass().await;
            }
            self.done -= 1;
            self.counters.applied.fetch_sub(1, Ordering::SeqCst);
            ctx.set_description(format!("{}: undoing, {} left", self.name, self.done));
            Ok(self.done == 0)
        }
    }
}
