//! Error and warning types for tier transfers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a single transfer step or by batch setup.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source and destination resolve to the same file.
    #[error("Source and destination are the same file: {path}")]
    SameFile { path: PathBuf },

    /// The path does not live under the batch's source directory.
    #[error("{path} is not under {root}")]
    NotUnderRoot { path: PathBuf, root: PathBuf },

    /// Creating or swapping the redirect symlink failed.
    #[error("Redirect failed at {path}: {source}")]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The redirect failed and so did the plain move used as fallback.
    #[error("Fallback move of {path} failed after redirect error ({redirect}): {source}")]
    Fallback {
        path: PathBuf,
        redirect: String,
        #[source]
        source: std::io::Error,
    },

    /// The destination root for a batch could not be prepared.
    #[error("Destination unavailable: {path}: {source}")]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker pool could not be started.
    #[error("Failed to start worker pool: {message}")]
    WorkerPool { message: String },

    /// The batch was cancelled before this unit started.
    #[error("Cancelled before transfer of {path}")]
    Cancelled { path: PathBuf },
}

impl TransferError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// The path this error is about.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::PermissionDenied { path }
            | Self::NotFound { path }
            | Self::Io { path, .. }
            | Self::SameFile { path }
            | Self::NotUnderRoot { path, .. }
            | Self::Redirect { path, .. }
            | Self::Fallback { path, .. }
            | Self::DestinationUnavailable { path, .. }
            | Self::Cancelled { path } => Some(path),
            Self::WorkerPool { .. } => None,
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Values are present but unusable.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// A per-file failure recorded in a batch outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    /// The path that failed.
    pub path: PathBuf,
    /// A human-readable error message.
    pub message: String,
}

impl FileError {
    /// Create a new file error.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<TransferError> for FileError {
    fn from(err: TransferError) -> Self {
        let path = err.path().cloned().unwrap_or_default();
        Self::new(path, err.to_string())
    }
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Kind of non-fatal warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Candidate file does not exist.
    Missing,
    /// Candidate is outside the expected root.
    OutsideRoot,
    /// Candidate appeared more than once in the batch.
    Duplicate,
    /// The additional-source root lists have different lengths.
    MappingMismatch,
    /// A copy succeeded but the path was not redirected to it.
    RedirectSkipped,
    /// The batch was cancelled before the file was processed.
    Cancelled,
}

/// Non-fatal condition encountered while preparing or running a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferWarning {
    /// Path the warning refers to, if any.
    pub path: Option<PathBuf>,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl TransferWarning {
    /// Create a new warning.
    pub fn new(path: Option<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path,
            message: message.into(),
            kind,
        }
    }

    /// Create a missing-file warning.
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            message: format!("File not found, skipping: {}", path.display()),
            path: Some(path),
            kind: WarningKind::Missing,
        }
    }

    /// Create a warning for a path outside the expected root.
    pub fn outside_root(path: impl Into<PathBuf>, root: &std::path::Path) -> Self {
        let path = path.into();
        Self {
            message: format!(
                "{} is not under {}, skipping",
                path.display(),
                root.display()
            ),
            path: Some(path),
            kind: WarningKind::OutsideRoot,
        }
    }

    /// Create a warning for a copy that was left without a redirect.
    pub fn redirect_skipped(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        let path = path.into();
        Self {
            message: format!(
                "Copied but not redirected {}: {reason}",
                path.display()
            ),
            path: Some(path),
            kind: WarningKind::RedirectSkipped,
        }
    }
}

impl std::fmt::Display for TransferWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
