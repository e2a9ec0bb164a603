//! Tiered atomic transfer engine for tiercache.
//!
//! Moves media files between the slow array tier and the fast cache tier.
//! Media files are swapped for a symlink to their new location via an atomic
//! rename, so a reader that has the original path open is never interrupted.

mod analysis;
mod deletion;
mod eligibility;
mod engine;
mod paths;
mod primitive;
mod scheduler;
mod source;
mod space;

pub use analysis::analyze;
pub use deletion::{DeletionSummary, delete_many};
pub use eligibility::EligibilityFilter;
pub use engine::{MoveOptions, TransferEngine};
pub use paths::{PathTranslator, SourceMapping};
pub use primitive::{FileTransfer, Linker, PosixLinker, TransferPrimitive};
pub use scheduler::{TransferProgress, TransferRequest, TransferScheduler};
pub use source::{MediaSource, StaticSource};
pub use space::{SpaceGuard, SpaceProbe, SpaceReport, StatvfsProbe};

pub use tiercache_core::{
    DryRunAnalysis, FileError, OperationType, TierConfig, TransferError, TransferMode,
    TransferOutcome, TransferWarning,
};
pub use tokio_util::sync::CancellationToken;

/// Default channel buffer size for transfer progress updates.
pub const PROGRESS_CHANNEL_SIZE: usize = 100;
