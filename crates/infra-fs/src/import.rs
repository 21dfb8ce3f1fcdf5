// Import job - copies files into a library directory
// Reversible: rollback removes the copies it made, newest first

use async_trait::async_trait;
use mediajobs_core::domain::OutcomeKind;
use mediajobs_core::{JobOutcome, JobTask, RollbackTask, StepContext, StepError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::progress::{forward_share, label, remaining_share, working_list};

/// Copies every source file (directories contribute their direct file
/// entries) into `library`. Files whose target already exists are skipped.
#[derive(Debug, Default)]
pub struct ImportFilesJob {
    sources: Vec<PathBuf>,
    library: PathBuf,
    // Working state, built by pre_execution
    prepared: bool,
    pending: Vec<PathBuf>,
    cursor: usize,
    copied: Vec<PathBuf>,
    skipped: usize,
    removed: usize,
    undo_total: Option<usize>,
}

impl ImportFilesJob {
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self {
            library: library.into(),
            ..Self::default()
        }
    }

    pub fn set_library(&mut self, library: impl Into<PathBuf>) {
        self.library = library.into();
    }

    pub fn add_source(&mut self, source: impl Into<PathBuf>) {
        self.sources.push(source.into());
    }

    pub fn add_sources<I, P>(&mut self, sources: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sources.extend(sources.into_iter().map(Into::into));
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    /// Copies made and not rolled back
    pub fn copied(&self) -> &[PathBuf] {
        &self.copied
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn total(&self) -> usize {
        if self.prepared {
            self.pending.len()
        } else {
            self.sources.len()
        }
    }

    async fn collect_sources(&self) -> Result<Vec<PathBuf>, StepError> {
        let mut files = Vec::new();
        for source in &self.sources {
            let metadata = fs::metadata(source).await.map_err(|e| {
                StepError::with_source(format!("cannot read {}", source.display()), e)
            })?;
            if !metadata.is_dir() {
                files.push(source.clone());
                continue;
            }
            let mut entries = fs::read_dir(source).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }
        }
        Ok(working_list(files))
    }
}

/// Copy `source` to a fresh `target`. Returns false when `target` exists.
async fn copy_new(source: &Path, target: &Path) -> Result<bool, StepError> {
    let mut reader = File::open(source).await?;
    let mut writer = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let copied = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(_) => writer.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = copied {
        // Leave no partial file behind
        let _ = fs::remove_file(target).await;
        return Err(StepError::with_source(
            format!("copy to {} failed", target.display()),
            e,
        ));
    }
    Ok(true)
}

#[async_trait]
impl JobTask for ImportFilesJob {
    fn name(&self) -> String {
        "import".to_string()
    }

    async fn pre_execution(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        if self.library.as_os_str().is_empty() {
            return Err(StepError::new("no library directory configured"));
        }
        fs::create_dir_all(&self.library).await.map_err(|e| {
            StepError::with_source(
                format!("cannot create library {}", self.library.display()),
                e,
            )
        })?;

        self.pending = self.collect_sources().await?;
        self.prepared = true;
        info!(
            files = self.pending.len(),
            library = %self.library.display(),
            "Import prepared"
        );
        ctx.set_description(format!("importing 0/{}", self.pending.len()));
        Ok(())
    }

    async fn next_step(&mut self, ctx: &StepContext) -> Result<bool, StepError> {
        let total = self.pending.len();
        let Some(source) = self.pending.get(self.cursor).cloned() else {
            return Ok(true);
        };
        ctx.set_description(format!(
            "importing {}/{}: {}",
            self.cursor + 1,
            total,
            label(&source)
        ));

        let Some(file_name) = source.file_name() else {
            return Err(StepError::new(format!(
                "{} has no file name",
                source.display()
            )));
        };
        let target = self.library.join(file_name);
        if copy_new(&source, &target).await? {
            debug!(source = %source.display(), target = %target.display(), "Copied");
            self.copied.push(target);
        } else {
            warn!(target = %target.display(), "Target already exists, skipping");
            self.skipped += 1;
        }

        self.cursor += 1;
        Ok(self.cursor >= total)
    }

    async fn post_execution(&mut self, ctx: &StepContext, outcome: &JobOutcome) {
        let summary = match outcome.kind {
            OutcomeKind::RolledBack => format!(
                "import rolled back: {} removed, {} skipped",
                self.removed, self.skipped
            ),
            kind => format!(
                "import {}: {} copied, {} skipped",
                kind,
                self.copied.len(),
                self.skipped
            ),
        };
        ctx.set_description(summary);
    }

    fn percentage(&self) -> u8 {
        match self.undo_total {
            Some(total) => remaining_share(self.copied.len(), total),
            None => forward_share(self.cursor, self.total()),
        }
    }

    fn as_rollback(&mut self) -> Option<&mut dyn RollbackTask> {
        Some(self)
    }
}

#[async_trait]
impl RollbackTask for ImportFilesJob {
    async fn next_rollback_step(&mut self, ctx: &StepContext) -> Result<bool, StepError> {
        let total = *self.undo_total.get_or_insert(self.copied.len());
        let Some(target) = self.copied.pop() else {
            return Ok(true);
        };
        ctx.set_description(format!(
            "removing {}/{}: {}",
            total - self.copied.len(),
            total,
            label(&target)
        ));

        match fs::remove_file(&target).await {
            Ok(()) => self.removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(target = %target.display(), "Copy already gone");
            }
            Err(e) => {
                self.copied.push(target);
                return Err(e.into());
            }
        }
        Ok(self.copied.is_empty())
    }
}
