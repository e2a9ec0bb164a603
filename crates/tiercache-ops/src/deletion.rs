//! Concurrent bulk deletion.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tiercache_core::{FileError, TransferError, size_to_human};

/// Result of a bulk deletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionSummary {
    /// Entries removed.
    pub deleted: usize,
    /// Bytes freed, measured before each removal.
    pub bytes_freed: u64,
    /// Per-file failures.
    pub errors: Vec<FileError>,
}

impl DeletionSummary {
    /// Check if every deletion succeeded.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Format the result as a user-friendly message.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            format!(
                "Deleted {} files, freed {}",
                self.deleted,
                size_to_human(self.bytes_freed)
            )
        } else {
            format!(
                "Deleted {}, failed {} (freed {})",
                self.deleted,
                self.errors.len(),
                size_to_human(self.bytes_freed)
            )
        }
    }
}

/// Delete `files` on a dedicated pool of `workers` threads.
///
/// Each file is independent; a missing file is recorded as a failure for that
/// file only. Symlinks are removed as links, their targets untouched.
pub fn delete_many(files: &[PathBuf], workers: usize) -> Result<DeletionSummary, TransferError> {
    if files.is_empty() {
        return Ok(DeletionSummary::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("tiercache-delete-{i}"))
        .build()
        .map_err(|e| TransferError::WorkerPool {
            message: e.to_string(),
        })?;

    let results: Vec<(PathBuf, Result<u64, TransferError>)> = pool.install(|| {
        files
            .par_iter()
            .map(|path| (path.clone(), delete_one(path)))
            .collect()
    });

    let mut summary = DeletionSummary::default();
    for (path, result) in results {
        match result {
            Ok(bytes) => {
                summary.deleted += 1;
                summary.bytes_freed += bytes;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "delete failed");
                summary.errors.push(FileError::new(path, e.to_string()));
            }
        }
    }

    info!("{}", summary.summary());
    Ok(summary)
}

/// Remove one entry and return the size it occupied.
fn delete_one(path: &Path) -> Result<u64, TransferError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| TransferError::io(path, e))?;
    if metadata.is_dir() {
        return Err(TransferError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::IsADirectory, "refusing to delete a directory"),
        });
    }
    let size = metadata.len();
    fs::remove_file(path).map_err(|e| TransferError::io(path, e))?;
    debug!(path = %path.display(), size, "deleted");
    Ok(size)
}
