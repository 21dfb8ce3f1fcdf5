//! Job manager scenarios
//!
//! Submission, completion, flush, cancellation latency and listener
//! unregistration, observed through recording listeners.

use std::time::Duration;

use mediajobs_core::port::job_task::mocks::{MockBehavior, MockTask, StepGate};
use mediajobs_core::port::listener::mocks::{ListenerEvent, RecordingListener};
use mediajobs_core::{Job, JobManager, JobState, OutcomeKind};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn position(events: &[ListenerEvent], wanted: ListenerEvent) -> usize {
    events
        .iter()
        .position(|event| *event == wanted)
        .unwrap_or_else(|| panic!("missing event {:?} in {:?}", wanted, events))
}

/// Three submissions produce three "added to active" events
#[tokio::test]
async fn test_submissions_are_announced() {
    let manager = JobManager::current().unwrap();
    let listener = RecordingListener::new();
    manager.add_listener(&listener);

    let gate = StepGate::new();
    let jobs: Vec<Job> = (0..3)
        .map(|i| Job::new(MockTask::new(format!("job-{}", i), 2).gated(gate.clone())))
        .collect();
    for job in &jobs {
        manager.execute_job(job).unwrap();
    }

    // Notifications are delivered before execute_job returns
    let added: Vec<ListenerEvent> = jobs
        .iter()
        .map(|job| ListenerEvent::AddedToActive(job.id()))
        .collect();
    assert_eq!(listener.events(), added);
    assert_eq!(manager.active_jobs().len(), 3);

    gate.release(6);
    timeout(WAIT, manager.wait_idle()).await.unwrap();
    assert_eq!(manager.finished_jobs().len(), 3);
    assert_eq!(listener.consistency_violations(), 0);
}

/// Each completion is a removal from active followed by an addition to finished
#[tokio::test]
async fn test_completion_moves_jobs_in_order() {
    let manager = JobManager::current().unwrap();
    let listener = RecordingListener::new();
    manager.add_listener(&listener);

    // The last job is held on its first step while the others complete
    let gate = StepGate::new();
    let jobs = vec![
        Job::new(MockTask::new("job-0", 3)),
        Job::new(MockTask::new("job-1", 3)),
        Job::new(MockTask::new("job-2", 3).gated(gate.clone())),
    ];
    for job in &jobs {
        manager.execute_job(job).unwrap();
    }
    timeout(WAIT, listener.wait_for_events(7)).await.unwrap();

    let events = listener.events();
    assert_eq!(events.len(), 7);
    assert_eq!(manager.active_jobs(), vec![jobs[2].clone()]);
    assert_eq!(manager.finished_jobs().len(), 2);
    for job in &jobs[..2] {
        let removed = position(&events, ListenerEvent::RemovedFromActive(job.id()));
        let finished = position(&events, ListenerEvent::AddedToFinished(job.id()));
        assert_eq!(removed + 1, finished, "pair is delivered as one unit");
        assert!(manager.finished_jobs().contains(job));
    }
    assert_eq!(jobs[2].state(), JobState::Running);

    gate.release(3);
    timeout(WAIT, manager.wait_idle()).await.unwrap();

    let events = listener.events();
    assert_eq!(events.len(), 9);
    for job in &jobs {
        let added = position(&events, ListenerEvent::AddedToActive(job.id()));
        let removed = position(&events, ListenerEvent::RemovedFromActive(job.id()));
        let finished = position(&events, ListenerEvent::AddedToFinished(job.id()));
        assert!(added < removed);
        assert_eq!(removed + 1, finished, "pair is delivered as one unit");
        assert_eq!(job.state(), JobState::Finished);
        assert_eq!(job.percentage(), 100);
    }
    assert_eq!(
        &events[7..],
        &[
            ListenerEvent::RemovedFromActive(jobs[2].id()),
            ListenerEvent::AddedToFinished(jobs[2].id()),
        ]
    );
    assert!(manager.active_jobs().is_empty());
    assert_eq!(manager.finished_jobs().len(), 3);
    assert_eq!(listener.consistency_violations(), 0);
}

/// Clearing finished jobs is announced once
#[tokio::test]
async fn test_flush_is_announced_once() {
    let manager = JobManager::current().unwrap();
    for i in 0..2 {
        manager
            .execute_job(&Job::new(MockTask::new(format!("job-{}", i), 1)))
            .unwrap();
    }
    timeout(WAIT, manager.wait_idle()).await.unwrap();
    assert_eq!(manager.finished_jobs().len(), 2);

    let listener = RecordingListener::new();
    manager.add_listener(&listener);
    manager.clear_finished_jobs();

    assert_eq!(listener.events(), vec![ListenerEvent::Flushed]);
    assert!(manager.finished_jobs().is_empty());
}

/// A cancel issued while a step is in progress takes effect once that step returns
#[tokio::test]
async fn test_cancel_takes_effect_after_current_step() {
    let manager = JobManager::current().unwrap();
    let gate = StepGate::new();
    let task = MockTask::new("slow", 5).gated(gate.clone());
    let counters = task.counters();
    let job = Job::new(task);
    manager.execute_job(&job).unwrap();

    gate.entered().await;
    job.cancel();
    assert_eq!(job.state(), JobState::Running);
    assert!(job.pending_requests().cancel);

    gate.release(1);
    let state = timeout(WAIT, job.wait_for_final()).await.unwrap();

    assert_eq!(state, JobState::Aborted);
    assert_eq!(job.outcome().map(|outcome| outcome.kind), Some(OutcomeKind::Aborted));
    assert!(job.failure().is_none());
    // Only the in-flight step ran
    assert_eq!(counters.applied.load(std::sync::atomic::Ordering::SeqCst), 1);
    timeout(WAIT, manager.wait_idle()).await.unwrap();
    assert_eq!(manager.finished_jobs(), vec![job]);
}

/// A listener removing itself mid-callback gets nothing afterwards
#[tokio::test]
async fn test_listener_unregistering_in_callback() {
    let manager = JobManager::current().unwrap();
    let leaving = RecordingListener::unregistering_at(0);
    let staying = RecordingListener::new();
    manager.add_listener(&leaving);
    manager.add_listener(&staying);

    let job = Job::new(MockTask::new("mock", 2));
    manager.execute_job(&job).unwrap();
    assert_eq!(manager.listener_count(), 1);

    timeout(WAIT, manager.wait_idle()).await.unwrap();
    manager.clear_finished_jobs();

    assert_eq!(leaving.events(), vec![ListenerEvent::AddedToActive(job.id())]);
    assert_eq!(staying.events().len(), 4);
}

#[tokio::test]
async fn test_failing_job_is_finished_with_failure() {
    let manager = JobManager::current().unwrap();
    let listener = RecordingListener::new();
    manager.add_listener(&listener);

    let job = Job::new(MockTask::new("mock", 3).fail_at(1, MockBehavior::Fail("bad input".into())));
    manager.execute_job(&job).unwrap();
    timeout(WAIT, manager.wait_idle()).await.unwrap();

    assert_eq!(job.state(), JobState::Aborted);
    assert_eq!(job.failure().map(|failure| failure.message), Some("bad input".to_string()));
    assert_eq!(manager.finished_jobs(), vec![job.clone()]);
    assert_eq!(
        listener.events(),
        vec![
            ListenerEvent::AddedToActive(job.id()),
            ListenerEvent::RemovedFromActive(job.id()),
            ListenerEvent::AddedToFinished(job.id()),
        ]
    );
}

#[tokio::test]
async fn test_managers_are_independent() {
    let first = JobManager::current().unwrap();
    let second = JobManager::current().unwrap();
    let first_listener = RecordingListener::new();
    let second_listener = RecordingListener::new();
    first.add_listener(&first_listener);
    second.add_listener(&second_listener);

    let job = Job::new(MockTask::new("mock", 1));
    first.execute_job(&job).unwrap();
    timeout(WAIT, first.wait_idle()).await.unwrap();

    assert_eq!(first_listener.events().len(), 3);
    assert!(second_listener.events().is_empty());
    assert!(second.finished_jobs().is_empty());
    assert!(job.manager().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_jobs_on_worker_threads() {
    let manager = JobManager::current().unwrap();
    let listener = RecordingListener::new();
    manager.add_listener(&listener);

    let jobs: Vec<Job> = (0..32).map(|i| Job::new(MockTask::new(format!("job-{}", i), 10))).collect();
    for job in &jobs {
        manager.execute_job(job).unwrap();
    }
    timeout(WAIT, manager.wait_idle()).await.unwrap();

    assert_eq!(listener.events().len(), 32 * 3);
    assert_eq!(listener.consistency_violations(), 0);
    assert!(jobs.iter().all(|job| job.state() == JobState::Finished));
}
