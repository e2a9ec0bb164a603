//! Read-only analysis of a candidate set.

use std::path::PathBuf;

use tracing::{debug, info};

use tiercache_core::{DryRunAnalysis, FileDescriptor, OperationType, TransferWarning};

/// Describe what `operation` would touch without modifying anything.
///
/// Only `stat()` is called; candidates that cannot be inspected become
/// warnings.
pub fn analyze(files: &[PathBuf], operation: OperationType) -> DryRunAnalysis {
    let mut descriptors = Vec::with_capacity(files.len());
    let mut warnings = Vec::new();

    for path in files {
        match FileDescriptor::from_path(path) {
            Ok(descriptor) if path.is_file() => descriptors.push(descriptor),
            Ok(_) => debug!(path = %path.display(), "not a regular file, skipping"),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot inspect");
                warnings.push(TransferWarning::missing(path));
            }
        }
    }

    let analysis = DryRunAnalysis::new(operation, descriptors, warnings);
    info!(
        operation = %operation,
        files = analysis.file_count,
        size = %analysis.total_size_human,
        "dry run analysis"
    );
    analysis
}
