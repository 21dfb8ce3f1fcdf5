// Console progress: list changes as they happen, plus a periodic ticker

use colored::Colorize;
use mediajobs_core::{Job, JobManager, JobManagerListener, JobState};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Prints every active/finished list change
pub struct ConsoleListener;

impl JobManagerListener for ConsoleListener {
    fn job_added_to_active(&self, _manager: &JobManager, job: &Job) {
        println!("{} {} ({})", "started".cyan().bold(), job.name(), job.id());
    }

    fn job_added_to_finished(&self, _manager: &JobManager, job: &Job) {
        let label = match (job.state(), job.failure()) {
            (JobState::Finished, _) => "finished".green().bold(),
            (_, Some(_)) => "failed".red().bold(),
            _ => "aborted".yellow().bold(),
        };
        println!("{} {}: {}", label, job.name(), job.description());
        if let Some(failure) = job.failure() {
            println!("  {}", failure.to_string().red());
        }
    }

    fn finished_jobs_flushed(&self, _manager: &JobManager) {
        println!("{}", "finished jobs cleared".dimmed());
    }
}

/// One status line for a job, e.g. "[ 40%] importing 2/5: a.jpg"
pub fn status_line(job: &Job) -> String {
    let mut line = format!("[{:>3}%] {}", job.percentage(), job.description());
    match job.state() {
        JobState::Suspended => line.push_str(" (suspended)"),
        _ if job.is_rolling_back() => line.push_str(" (rolling back)"),
        _ => {}
    }
    line
}

/// Print the status of every active job each `period` until aborted
pub fn spawn_ticker(manager: JobManager, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for job in manager.active_jobs() {
                println!("{}", status_line(&job).dimmed());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediajobs_infra_fs::DeleteFilesJob;

    #[test]
    fn test_status_line_before_start() {
        let job = Job::new(DeleteFilesJob::new());
        job.set_description("waiting");
        assert_eq!(status_line(&job), "[100%] waiting");
    }
}
