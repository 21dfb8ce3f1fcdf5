// Shared bookkeeping for the file jobs

use std::path::{Path, PathBuf};

/// Forward progress: `done` of `total`, 100 when there is nothing to do
pub(crate) fn forward_share(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Rollback progress: the share of the undo list still left to revert
pub(crate) fn remaining_share(remaining: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((remaining.min(total) * 100) / total) as u8
}

/// File name for status lines, falling back to the full path
pub(crate) fn label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Sorted, de-duplicated working list
pub(crate) fn working_list(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut list: Vec<PathBuf> = paths.into_iter().collect();
    list.sort();
    list.dedup();
    list
}
