//! Value types describing files, batches and their results.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{FileError, TransferError, TransferWarning};

/// Format a byte count in human-readable binary units.
pub fn size_to_human(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Whether a transfer removes the source or leaves it in place.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

/// The kind of operation a dry run is describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Promote files to the cache tier.
    Cache,
    /// Demote files back to the array tier.
    Array,
    /// Remove files.
    Delete,
}

/// Read-only snapshot of a file's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Absolute path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// File name component.
    pub filename: String,
    /// Parent directory.
    pub directory: PathBuf,
    /// Size formatted for display.
    pub size_human: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

impl FileDescriptor {
    /// Stat a file and build its descriptor.
    pub fn from_path(path: &Path) -> Result<Self, TransferError> {
        let metadata = fs::metadata(path).map_err(|e| TransferError::io(path, e))?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            size_human: size_to_human(metadata.len()),
            modified,
        })
    }
}

/// Aggregated result of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// True iff no per-file error was recorded.
    pub success: bool,
    /// Number of files transferred (or that would be, in a dry run).
    pub files_processed: usize,
    /// Total bytes transferred.
    pub total_size_bytes: u64,
    /// `total_size_bytes` formatted for display.
    pub total_size_human: String,
    /// Per-file failures.
    pub errors: Vec<FileError>,
    /// Non-fatal conditions.
    pub warnings: Vec<TransferWarning>,
    /// Whether this outcome describes a dry run.
    pub dry_run: bool,
}

impl TransferOutcome {
    /// Create an empty outcome.
    pub fn new(dry_run: bool) -> Self {
        Self {
            success: true,
            files_processed: 0,
            total_size_bytes: 0,
            total_size_human: size_to_human(0),
            errors: Vec::new(),
            warnings: Vec::new(),
            dry_run,
        }
    }

    /// Record a completed file.
    pub fn record_file(&mut self, bytes: u64) {
        self.files_processed += 1;
        self.total_size_bytes += bytes;
    }

    /// Record a failed file.
    pub fn record_error(&mut self, error: impl Into<FileError>) {
        self.errors.push(error.into());
    }

    /// Record a warning.
    pub fn warn(&mut self, warning: TransferWarning) {
        self.warnings.push(warning);
    }

    /// Recompute the derived fields once all files are accounted for.
    pub fn finish(mut self) -> Self {
        self.success = self.errors.is_empty();
        self.total_size_human = size_to_human(self.total_size_bytes);
        self
    }

    /// Check if the batch has any errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get a human-readable summary of the batch.
    pub fn summary(&self) -> String {
        let action = if self.dry_run { "Would transfer" } else { "Transferred" };
        if self.errors.is_empty() {
            format!(
                "{} {} files ({})",
                action, self.files_processed, self.total_size_human
            )
        } else {
            format!(
                "{} {} files ({}), {} failed",
                action,
                self.files_processed,
                self.total_size_human,
                self.errors.len()
            )
        }
    }
}

impl Default for TransferOutcome {
    fn default() -> Self {
        Self::new(false)
    }
}

/// What a batch would touch, computed without modifying anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunAnalysis {
    /// Operation being analyzed.
    pub operation: OperationType,
    /// Existing candidate files.
    pub files: Vec<FileDescriptor>,
    /// Sum of `files` sizes.
    pub total_size: u64,
    /// `total_size` formatted for display.
    pub total_size_human: String,
    /// Number of files.
    pub file_count: usize,
    /// Candidates that were skipped.
    pub warnings: Vec<TransferWarning>,
}

impl DryRunAnalysis {
    /// Build an analysis from descriptors.
    pub fn new(
        operation: OperationType,
        files: Vec<FileDescriptor>,
        warnings: Vec<TransferWarning>,
    ) -> Self {
        let total_size = files.iter().map(|f| f.size).sum();
        Self {
            operation,
            file_count: files.len(),
            total_size,
            total_size_human: size_to_human(total_size),
            files,
            warnings,
        }
    }
}
