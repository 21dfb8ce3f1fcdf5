//! Mediajobs CLI - runs file jobs (import, delete, rename) with live progress

mod config;
mod logging;
mod progress;
mod summary;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mediajobs_core::{Job, JobManager, VERSION};
use mediajobs_infra_fs::{DeleteFilesJob, ImportFilesJob, RenameFilesJob};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::progress::ConsoleListener;

#[derive(Parser)]
#[command(name = "mediajobs")]
#[command(about = "Media library background jobs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "MEDIAJOBS_CONFIG")]
    config: Option<PathBuf>,

    /// On Ctrl-C, undo the work done so far instead of just stopping
    #[arg(long, global = true)]
    rollback_on_interrupt: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy files into a library directory
    Import {
        /// Library directory receiving the copies
        #[arg(short, long)]
        library: PathBuf,

        /// Files or directories to import
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Delete files
    Delete {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Replace a pattern in file names
    Rename {
        /// Text to look for in each file name
        #[arg(short, long)]
        pattern: String,

        /// Replacement text
        #[arg(short, long, default_value = "")]
        replacement: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn build_job(command: Commands) -> Result<Job> {
    let job = match command {
        Commands::Import { library, sources } => {
            let job = Job::new(ImportFilesJob::new(library));
            job.configure(|task: &mut ImportFilesJob| task.add_sources(sources))?;
            job
        }
        Commands::Delete { files } => {
            let job = Job::new(DeleteFilesJob::new());
            job.configure(|task: &mut DeleteFilesJob| task.add_files(files))?;
            job
        }
        Commands::Rename {
            pattern,
            replacement,
            files,
        } => {
            let job = Job::new(RenameFilesJob::new(pattern, replacement));
            job.configure(|task: &mut RenameFilesJob| task.add_files(files))?;
            job
        }
    };
    Ok(job)
}

/// Cancel every active job, or roll back the ones that support it
fn interrupt(manager: &JobManager, rollback: bool) {
    for job in manager.active_jobs() {
        if rollback && job.supports_rollback() {
            match manager.rollback_job(&job) {
                Ok(()) => {
                    println!("{} {}", "rolling back".yellow().bold(), job.name());
                    continue;
                }
                Err(e) => warn!(job_id = %job.id(), error = %e, "Rollback refused, cancelling"),
            }
        }
        println!("{} {}", "cancelling".yellow().bold(), job.name());
        job.cancel();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration and logging
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init(&config.logging)?;
    info!("mediajobs v{} starting", VERSION);

    // 2. Manager and console output
    let manager = JobManager::current()?;
    let console = Arc::new(ConsoleListener);
    manager.add_listener(&console);

    // 3. Submit and watch
    let job = build_job(cli.command)?;
    manager.execute_job(&job)?;
    let ticker = progress::spawn_ticker(
        manager.clone(),
        Duration::from_millis(config.progress.interval_ms),
    );

    tokio::select! {
        _ = manager.wait_idle() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            interrupt(&manager, cli.rollback_on_interrupt);
            manager.wait_idle().await;
        }
    }
    ticker.abort();

    // 4. Summary
    println!();
    println!("{}", summary::render(&manager.finished_jobs()));

    // Cancellation is not an error; a failing step is
    if let Some(failure) = job.failure() {
        anyhow::bail!("{} failed: {}", job.name(), failure);
    }
    Ok(())
}
