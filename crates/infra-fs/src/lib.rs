// Mediajobs Infrastructure - File System Jobs
// Implements: JobTask (and RollbackTask where the work is reversible)

pub mod delete;
pub mod import;
mod progress;
pub mod rename;

pub use delete::DeleteFilesJob;
pub use import::ImportFilesJob;
pub use rename::RenameFilesJob;
