//! Concurrent batch scheduling over a per-batch worker pool.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use rayon::prelude::*;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tiercache_core::{
    FileError, TierConfig, TransferError, TransferMode, TransferOutcome, TransferWarning,
    WarningKind,
};

use crate::PROGRESS_CHANNEL_SIZE;
use crate::primitive::{FileTransfer, TransferPrimitive};

/// A batch of files to move between two tier roots.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Absolute source paths, each expected under `source_dir`.
    pub files: Vec<PathBuf>,
    /// Root of the source tier.
    pub source_dir: PathBuf,
    /// Root of the destination tier.
    pub dest_dir: PathBuf,
    /// Move or copy.
    pub mode: TransferMode,
    /// Describe the batch without touching the filesystem.
    pub dry_run: bool,
    /// Worker count override; `None` picks by source locality.
    pub concurrency: Option<usize>,
    /// Cooperative cancellation for units not yet started.
    pub cancel: CancellationToken,
}

impl TransferRequest {
    /// Create a move request with default options.
    pub fn new(
        files: Vec<PathBuf>,
        source_dir: impl Into<PathBuf>,
        dest_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            files,
            source_dir: source_dir.into(),
            dest_dir: dest_dir.into(),
            mode: TransferMode::Move,
            dry_run: false,
            concurrency: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the transfer mode.
    pub fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
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
        self.cancel = cancel;
        self
    }
}

/// Progress snapshot published after each file.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Files finished, successfully or not.
    pub completed: usize,
    /// Files scheduled in the batch.
    pub total: usize,
    /// Files that failed so far.
    pub failed: usize,
    /// Bytes transferred so far.
    pub bytes: u64,
    /// The file that just finished.
    pub current: PathBuf,
}

/// Prepared unit of work.
#[derive(Debug, Clone)]
struct Job {
    src: PathBuf,
    dest: PathBuf,
}

/// Fans a batch out to a bounded pool of workers running the primitive.
#[derive(Debug)]
pub struct TransferScheduler {
    config: Arc<TierConfig>,
    primitive: TransferPrimitive,
    progress_tx: broadcast::Sender<TransferProgress>,
}

impl TransferScheduler {
    /// Create a scheduler.
    pub fn new(config: Arc<TierConfig>, primitive: TransferPrimitive) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_SIZE);
        Self {
            config,
            primitive,
            progress_tx,
        }
    }

    /// Swap the primitive, keeping the progress channel and its subscribers.
    pub fn with_primitive(mut self, primitive: TransferPrimitive) -> Self {
        self.primitive = primitive;
        self
    }

    /// Subscribe to per-file progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferProgress> {
        self.progress_tx.subscribe()
    }

    /// Worker count for a batch reading from `source_dir`.
    ///
    /// Network filesystems degrade under high fan-out, so additional
    /// (network-attached) roots get the smaller pool.
    pub fn workers_for(&self, source_dir: &Path, concurrency: Option<usize>) -> usize {
        let workers = concurrency.unwrap_or_else(|| {
            if self.config.is_network_path(source_dir) {
                self.config.network_workers
            } else {
                self.config.local_workers
            }
        });
        workers.max(1)
    }

    /// Run a batch and aggregate per-file results.
    ///
    /// Only setup failures (destination root, worker pool) are returned as
    /// `Err`; everything file-specific lands in the outcome.
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferOutcome, TransferError> {
        let mut outcome = TransferOutcome::new(request.dry_run);

        if !request.dry_run {
            fs::create_dir_all(&request.dest_dir).map_err(|source| {
                TransferError::DestinationUnavailable {
                    path: request.dest_dir.clone(),
                    source,
                }
            })?;
        }

        let jobs = self.prepare(request, &mut outcome);

        if request.dry_run {
            for job in &jobs {
                let size = fs::metadata(&job.src).map(|m| m.len()).unwrap_or(0);
                debug!(src = %job.src.display(), dest = %job.dest.display(), "would transfer");
                outcome.record_file(size);
            }
            let outcome = outcome.finish();
            info!(dry_run = true, "{}", outcome.summary());
            return Ok(outcome);
        }

        if jobs.is_empty() {
            return Ok(outcome.finish());
        }

        let workers = self.workers_for(&request.source_dir, request.concurrency);
        info!(
            files = jobs.len(),
            workers,
            mode = %request.mode,
            source = %request.source_dir.display(),
            dest = %request.dest_dir.display(),
            "starting transfer batch"
        );

        let results = self.run(jobs, workers, request)?;

        for (src, result) in results {
            match result {
                Ok(transfer) => {
                    outcome.record_file(transfer.bytes);
                    if let Some(warning) = transfer.warning {
                        outcome.warn(warning);
                    }
                }
                Err(TransferError::Cancelled { path }) => {
                    outcome.warn(TransferWarning::new(
                        Some(path),
                        format!("Batch cancelled before {} started", src.display()),
                        WarningKind::Cancelled,
                    ));
                }
                Err(e) => {
                    error!(src = %src.display(), error = %e, "transfer failed");
                    outcome.record_error(FileError::new(src, e.to_string()));
                }
            }
        }

        let outcome = outcome.finish();
        info!("{}", outcome.summary());
        Ok(outcome)
    }

    /// Resolve destinations and drop anything that cannot be scheduled.
    fn prepare(&self, request: &TransferRequest, outcome: &mut TransferOutcome) -> Vec<Job> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(request.files.len());

        for src in &request.files {
            let Ok(relative) = src.strip_prefix(&request.source_dir) else {
                warn!(src = %src.display(), root = %request.source_dir.display(), "outside source root");
                outcome.warn(TransferWarning::outside_root(src, &request.source_dir));
                continue;
            };
            if relative.as_os_str().is_empty() {
                outcome.warn(TransferWarning::outside_root(src, &request.source_dir));
                continue;
            }
            if !seen.insert(src.clone()) {
                outcome.warn(TransferWarning::new(
                    Some(src.clone()),
                    format!("Listed more than once, transferring once: {}", src.display()),
                    WarningKind::Duplicate,
                ));
                continue;
            }
            if !src.exists() {
                warn!(src = %src.display(), "source missing");
                outcome.warn(TransferWarning::missing(src));
                continue;
            }

            let dest = request.dest_dir.join(relative);
            if !request.dry_run {
                if let Some(parent) = dest.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        error!(dir = %parent.display(), error = %e, "cannot create destination directory");
                        outcome.record_error(FileError::new(
                            src,
                            TransferError::io(parent, e).to_string(),
                        ));
                        continue;
                    }
                }
            }

            jobs.push(Job {
                src: src.clone(),
                dest,
            });
        }

        jobs
    }

    /// Execute jobs on a fresh pool; the pool is dropped with the batch.
    fn run(
        &self,
        jobs: Vec<Job>,
        workers: usize,
        request: &TransferRequest,
    ) -> Result<Vec<(PathBuf, Result<FileTransfer, TransferError>)>, TransferError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tiercache-transfer-{i}"))
            .build()
            .map_err(|e| TransferError::WorkerPool {
                message: e.to_string(),
            })?;

        let total = jobs.len();
        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);

        let results = pool.install(|| {
            jobs.into_par_iter()
                .map(|job| {
                    if request.cancel.is_cancelled() {
                        let path = job.src.clone();
                        return (job.src, Err(TransferError::Cancelled { path }));
                    }

                    let result = self.primitive.transfer_one(&job.src, &job.dest, request.mode);
                    match &result {
                        Ok(t) => {
                            bytes.fetch_add(t.bytes, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    let _ = self.progress_tx.send(TransferProgress {
                        completed: done,
                        total,
                        failed: failed.load(Ordering::Relaxed),
                        bytes: bytes.load(Ordering::Relaxed),
                        current: job.src.clone(),
                    });
                    (job.src, result)
                })
                .collect()
        });

        Ok(results)
    }
}
