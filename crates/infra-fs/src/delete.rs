// Delete job - removes files, one per step
// Not reversible

use async_trait::async_trait;
use mediajobs_core::{JobOutcome, JobTask, StepContext, StepError};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::progress::{forward_share, label, working_list};

/// Deletes the configured files. Missing files are skipped.
#[derive(Debug, Default)]
pub struct DeleteFilesJob {
    files: Vec<PathBuf>,
    cursor: usize,
    deleted: usize,
    skipped: usize,
}

impl DeleteFilesJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, file: impl Into<PathBuf>) {
        self.files.push(file.into());
    }

    pub fn add_files<I, P>(&mut self, files: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files.extend(files.into_iter().map(Into::into));
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[async_trait]
impl JobTask for DeleteFilesJob {
    fn name(&self) -> String {
        "delete".to_string()
    }

    async fn pre_execution(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        self.files = working_list(std::mem::take(&mut self.files));
        info!(files = self.files.len(), "Delete prepared");
        ctx.set_description(format!("deleting 0/{}", self.files.len()));
        Ok(())
    }

    async fn next_step(&mut self, ctx: &StepContext) -> Result<bool, StepError> {
        let total = self.files.len();
        let Some(file) = self.files.get(self.cursor) else {
            return Ok(true);
        };
        ctx.set_description(format!(
            "deleting {}/{}: {}",
            self.cursor + 1,
            total,
            label(file)
        ));

        match fs::remove_file(file).await {
            Ok(()) => {
                debug!(file = %file.display(), "Deleted");
                self.deleted += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(file = %file.display(), "File not found, skipping");
                self.skipped += 1;
            }
            Err(e) => {
                return Err(StepError::with_source(
                    format!("cannot delete {}", file.display()),
                    e,
                ))
            }
        }

        self.cursor += 1;
        Ok(self.cursor >= total)
    }

    async fn post_execution(&mut self, ctx: &StepContext, outcome: &JobOutcome) {
        ctx.set_description(format!(
            "delete {}: {} deleted, {} skipped",
            outcome.kind, self.deleted, self.skipped
        ));
    }

    fn percentage(&self) -> u8 {
        forward_share(self.cursor, self.files.len())
    }
}
