// Rename job - replaces a pattern in file names
// Reversible: rollback renames back, newest first

use async_trait::async_trait;
use mediajobs_core::domain::OutcomeKind;
use mediajobs_core::{JobOutcome, JobTask, RollbackTask, StepContext, StepError};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::progress::{forward_share, label, remaining_share, working_list};

/// A rename performed by the job, kept for rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Renames each file by replacing every occurrence of `pattern` in its file
/// name with `replacement`. Names without the pattern and renames onto an
/// existing path are skipped.
#[derive(Debug, Default)]
pub struct RenameFilesJob {
    files: Vec<PathBuf>,
    pattern: String,
    replacement: String,
    cursor: usize,
    renamed: Vec<Renamed>,
    skipped: usize,
    reverted: usize,
    undo_total: Option<usize>,
}

impl RenameFilesJob {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            ..Self::default()
        }
    }

    pub fn set_pattern(&mut self, pattern: impl Into<String>, replacement: impl Into<String>) {
        self.pattern = pattern.into();
        self.replacement = replacement.into();
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

    /// Renames made and not rolled back
    pub fn renamed(&self) -> &[Renamed] {
        &self.renamed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn target_for(&self, file: &std::path::Path) -> Option<PathBuf> {
        let name = file.file_name()?.to_str()?;
        if !name.contains(self.pattern.as_str()) {
            return None;
        }
        Some(file.with_file_name(name.replace(self.pattern.as_str(), &self.replacement)))
    }
}

#[async_trait]
impl JobTask for RenameFilesJob {
    fn name(&self) -> String {
        "rename".to_string()
    }

    async fn pre_execution(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        if self.pattern.is_empty() {
            return Err(StepError::new("rename pattern is empty"));
        }
        self.files = working_list(std::mem::take(&mut self.files));
        info!(
            files = self.files.len(),
            pattern = %self.pattern,
            replacement = %self.replacement,
            "Rename prepared"
        );
        ctx.set_description(format!("renaming 0/{}", self.files.len()));
        Ok(())
    }

    async fn next_step(&mut self, ctx: &StepContext) -> Result<bool, StepError> {
        let total = self.files.len();
        let Some(file) = self.files.get(self.cursor).cloned() else {
            return Ok(true);
        };
        self.cursor += 1;
        ctx.set_description(format!(
            "renaming {}/{}: {}",
            self.cursor,
            total,
            label(&file)
        ));

        let Some(target) = self.target_for(&file) else {
            debug!(file = %file.display(), "Name does not contain the pattern, skipping");
            self.skipped += 1;
            return Ok(self.cursor >= total);
        };
        if fs::try_exists(&target).await? {
            warn!(target = %target.display(), "Target already exists, skipping");
            self.skipped += 1;
            return Ok(self.cursor >= total);
        }

        fs::rename(&file, &target).await.map_err(|e| {
            StepError::with_source(format!("cannot rename {}", file.display()), e)
        })?;
        debug!(from = %file.display(), to = %target.display(), "Renamed");
        self.renamed.push(Renamed {
            from: file,
            to: target,
        });
        Ok(self.cursor >= total)
    }

    async fn post_execution(&mut self, ctx: &StepContext, outcome: &JobOutcome) {
        let summary = match outcome.kind {
            OutcomeKind::RolledBack => format!(
                "rename rolled back: {} reverted, {} skipped",
                self.reverted, self.skipped
            ),
            kind => format!(
                "rename {}: {} renamed, {} skipped",
                kind,
                self.renamed.len(),
                self.skipped
            ),
        };
        ctx.set_description(summary);
    }

    fn percentage(&self) -> u8 {
        match self.undo_total {
            Some(total) => remaining_share(self.renamed.len(), total),
            None => forward_share(self.cursor, self.files.len()),
        }
    }

    fn as_rollback(&mut self) -> Option<&mut dyn RollbackTask> {
        Some(self)
    }
}

#[async_trait]
impl RollbackTask for RenameFilesJob {
    async fn next_rollback_step(&mut self, ctx: &StepContext) -> Result<bool, StepError> {
        let total = *self.undo_total.get_or_insert(self.renamed.len());
        let Some(entry) = self.renamed.pop() else {
            return Ok(true);
        };
        ctx.set_description(format!(
            "reverting {}/{}: {}",
            total - self.renamed.len(),
            total,
            label(&entry.to)
        ));

        if let Err(e) = fs::rename(&entry.to, &entry.from).await {
            let message = format!("cannot rename {} back", entry.to.display());
            self.renamed.push(entry);
            return Err(StepError::with_source(message, e));
        }
        self.reverted += 1;
        Ok(self.renamed.is_empty())
    }
}
