//! Core types and configuration for tiercache.
//!
//! This crate holds the value types shared by the transfer engine and its
//! callers: tier configuration, media classification, per-file descriptors,
//! batch outcomes and the error types used across the workspace.

mod config;
mod error;
mod media;
mod model;

pub use config::{PathSubstitution, RedirectMode, TierConfig, TierConfigBuilder};
pub use error::{ConfigError, FileError, TransferError, TransferWarning, WarningKind};
pub use media::MediaKind;
pub use model::{
    DryRunAnalysis, FileDescriptor, OperationType, TransferMode, TransferOutcome, size_to_human,
};
