// End-of-run summary table

use mediajobs_core::Job;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct JobRow {
    job: String,
    state: String,
    outcome: String,
    progress: String,
    elapsed: String,
    description: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        let outcome = match job.outcome() {
            Some(outcome) => match outcome.failure {
                Some(failure) => format!("{} ({})", outcome.kind, failure),
                None => outcome.kind.to_string(),
            },
            None => "-".to_string(),
        };
        let elapsed = match (job.started_at(), job.finished_at()) {
            (Some(start), Some(end)) => {
                format!("{:.2}s", (end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => "-".to_string(),
        };
        Self {
            job: job.name().to_string(),
            state: job.state().to_string(),
            outcome,
            progress: format!("{}%", job.percentage()),
            elapsed,
            description: job.description(),
        }
    }
}

pub fn render(jobs: &[Job]) -> String {
    let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
