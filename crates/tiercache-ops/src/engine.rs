//! Facade combining translation, filtering, space checks and transfers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tiercache_core::{
    DryRunAnalysis, OperationType, TierConfig, TransferError, TransferMode, TransferOutcome,
    TransferWarning,
};

use crate::analysis::analyze;
use crate::deletion::{DeletionSummary, delete_many};
use crate::eligibility::EligibilityFilter;
use crate::paths::PathTranslator;
use crate::primitive::{Linker, TransferPrimitive};
use crate::scheduler::{TransferProgress, TransferRequest, TransferScheduler};
use crate::source::MediaSource;
use crate::space::{SpaceGuard, SpaceProbe};

/// Options for [`TransferEngine::move_files`].
#[derive(Debug, Clone, Default)]
pub struct MoveOptions {
    /// Move or copy.
    pub mode: TransferMode,
    /// Describe the batch without touching the filesystem.
    pub dry_run: bool,
    /// Worker count override.
    pub concurrency: Option<usize>,
    /// Batch-specific cancellation; defaults to a child of the engine token.
    pub cancel: Option<CancellationToken>,
}

impl MoveOptions {
    /// Copy instead of move.
    pub fn copy() -> Self {
        Self {
            mode: TransferMode::Copy,
            ..Self::default()
        }
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Override the worker count.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    /// Use a caller-owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Entry point used by the orchestrator.
///
/// Holds no mutable state besides the progress channel and the shutdown
/// token; every call is independent.
#[derive(Debug)]
pub struct TransferEngine {
    config: Arc<TierConfig>,
    translator: Arc<PathTranslator>,
    filter: EligibilityFilter,
    space: SpaceGuard,
    scheduler: TransferScheduler,
    cancel: CancellationToken,
}

impl TransferEngine {
    /// Create an engine using real symlinks and `statvfs`.
    pub fn new(config: TierConfig) -> Self {
        let config = Arc::new(config);
        let translator = Arc::new(PathTranslator::new(&config));
        let primitive = TransferPrimitive::new(config.clone());
        Self {
            filter: EligibilityFilter::new(translator.clone()),
            scheduler: TransferScheduler::new(config.clone(), primitive),
            space: SpaceGuard::new(),
            cancel: CancellationToken::new(),
            config,
            translator,
        }
    }

    /// Replace the link operations used by the transfer primitive.
    ///
    /// Existing progress receivers and cancellation tokens stay connected.
    pub fn with_linker(mut self, linker: Arc<dyn Linker>) -> Self {
        let primitive = TransferPrimitive::with_linker(self.config.clone(), linker);
        self.scheduler = self.scheduler.with_primitive(primitive);
        self
    }

    /// Replace the free-space probe.
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space = SpaceGuard::with_probe(probe);
        self
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// The path translator.
    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    /// Configuration warnings, such as mismatched additional-source lists.
    pub fn warnings(&self) -> &[TransferWarning] {
        self.translator.warnings()
    }

    /// Translate media-server paths to real paths.
    pub fn process_file_paths<S: AsRef<str>>(&self, paths: &[S]) -> Vec<PathBuf> {
        self.translator.translate(paths)
    }

    /// Keep files that exist on the array tier and are not cached yet.
    pub fn filter_files_for_cache(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        self.filter.for_cache(files)
    }

    /// Keep files that exist on the cache tier and are absent from the array.
    pub fn filter_files_for_array(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        self.filter.for_array(files)
    }

    /// Describe an operation without performing it.
    pub fn analyze_files_for_test_mode(
        &self,
        files: &[PathBuf],
        operation: OperationType,
    ) -> DryRunAnalysis {
        analyze(files, operation)
    }

    /// Whether `destination` has room for `files`.
    pub fn check_available_space(&self, files: &[PathBuf], destination: &Path) -> bool {
        self.space.has_space(files, destination)
    }

    /// Pull candidates from `source`, translate them and keep the cacheable ones.
    pub fn cache_candidates<S: MediaSource>(&self, source: &S) -> Result<Vec<PathBuf>, S::Error> {
        let raw = source.candidates()?;
        let real = self.process_file_paths(raw.as_slice());
        let eligible = self.filter_files_for_cache(&real);
        info!(
            reported = raw.len(),
            eligible = eligible.len(),
            "collected cache candidates"
        );
        Ok(eligible)
    }

    /// Transfer `files` from `source_dir` to `dest_dir`.
    pub fn move_files(
        &self,
        files: &[PathBuf],
        source_dir: &Path,
        dest_dir: &Path,
        options: MoveOptions,
    ) -> Result<TransferOutcome, TransferError> {
        let cancel = options
            .cancel
            .unwrap_or_else(|| self.cancel.child_token());
        let mut request = TransferRequest::new(files.to_vec(), source_dir, dest_dir)
            .with_mode(options.mode)
            .with_dry_run(options.dry_run)
            .with_cancel(cancel);
        if let Some(workers) = options.concurrency {
            request = request.with_concurrency(workers);
        }
        self.scheduler.transfer(&request)
    }

    /// Delete `files` and report the full summary.
    ///
    /// Concurrency defaults to the local worker count.
    pub fn delete(
        &self,
        files: &[PathBuf],
        concurrency: Option<usize>,
    ) -> Result<DeletionSummary, TransferError> {
        delete_many(files, concurrency.unwrap_or(self.config.local_workers))
    }

    /// Delete `files`, returning `(deleted, bytes_freed)`.
    pub fn delete_files(&self, files: &[PathBuf], concurrency: Option<usize>) -> (usize, u64) {
        match self.delete(files, concurrency) {
            Ok(summary) => (summary.deleted, summary.bytes_freed),
            Err(e) => {
                error!(error = %e, "deletion batch could not start");
                (0, 0)
            }
        }
    }

    /// Subscribe to per-file progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferProgress> {
        self.scheduler.subscribe()
    }

    /// Token that cancels every batch started without its own token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticSource;
    use std::fs;
    use tempfile::TempDir;
    use tiercache_core::PathSubstitution;

    fn engine(root: &Path) -> TransferEngine {
        let user = format!("{}/user/", root.display());
        let config = TierConfig::builder()
            .primary_external_root("/data")
            .primary_real_root(root.join("user"))
            .cache_substitution(PathSubstitution::new(&user, format!("{}/cache/", root.display())))
            .array_substitution(PathSubstitution::new(&user, format!("{}/user0/", root.display())))
            .build()
            .unwrap();
        TransferEngine::new(config)
    }

    #[test]
    fn test_cache_candidates() {
        let temp = TempDir::new().unwrap();
        for tier in ["user", "user0"] {
            let show = temp.path().join(tier).join("tv/show");
            fs::create_dir_all(&show).unwrap();
            fs::write(show.join("e01.mkv"), "x").unwrap();
        }

        let engine = engine(temp.path());
        let source = StaticSource::new(vec![
            "/data/tv/show/e01.mkv".to_string(),
            "/data/tv/show/e02.mkv".to_string(),
            "  ".to_string(),
        ]);
        let candidates = engine.cache_candidates(&source).unwrap();
        assert_eq!(candidates, vec![temp.path().join("user/tv/show/e01.mkv")]);
    }

    #[test]
    fn test_engine_token_cancels_default_batches() {
        let temp = TempDir::new().unwrap();
        let src_root = temp.path().join("src");
        fs::create_dir_all(&src_root).unwrap();
        let file = src_root.join("a.mkv");
        fs::write(&file, "x").unwrap();

        let engine = engine(temp.path());
        engine.cancellation_token().cancel();
        let outcome = engine
            .move_files(&[file.clone()], &src_root, &temp.path().join("dst"), MoveOptions::default())
            .unwrap();
        assert_eq!(outcome.files_processed, 0);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(file.is_file());
    }

    #[test]
    fn test_delete_files_defaults() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.mkv");
        fs::write(&a, vec![0u8; 10]).unwrap();

        let engine = engine(temp.path());
        assert_eq!(engine.delete_files(&[a], None), (1, 10));
        assert_eq!(engine.delete_files(&[], None), (0, 0));
    }

    #[test]
    fn test_with_linker_keeps_token_and_subscribers() {
        let temp = TempDir::new().unwrap();
        let src_root = temp.path().join("src");
        fs::create_dir_all(&src_root).unwrap();
        let first = src_root.join("a.mkv");
        let second = src_root.join("b.mkv");
        fs::write(&first, "x").unwrap();
        fs::write(&second, "y").unwrap();

        let engine = engine(temp.path());
        let token = engine.cancellation_token();
        let mut progress = engine.subscribe();
        let engine = engine.with_linker(Arc::new(crate::primitive::PosixLinker));

        let dst_root = temp.path().join("dst");
        let outcome = engine
            .move_files(&[first.clone()], &src_root, &dst_root, MoveOptions::default())
            .unwrap();
        assert_eq!(outcome.files_processed, 1);
        let event = progress.try_recv().unwrap();
        assert_eq!(event.current, first);

        token.cancel();
        let outcome = engine
            .move_files(&[second.clone()], &src_root, &dst_root, MoveOptions::default())
            .unwrap();
        assert_eq!(outcome.files_processed, 0);
        assert!(second.is_file());
    }
}
