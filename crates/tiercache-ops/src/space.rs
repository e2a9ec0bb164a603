//! Pre-flight free-space check.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use tiercache_core::{TransferError, size_to_human};

/// Source of free-space figures for a filesystem.
pub trait SpaceProbe: Send + Sync + std::fmt::Debug {
    /// Bytes available to unprivileged writers on the filesystem holding `path`.
    fn free_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Reads free space with `statvfs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn free_bytes(&self, path: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

/// Required versus available bytes for a planned transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceReport {
    /// Sum of sizes of the existing candidates.
    pub required: u64,
    /// Free bytes on the destination filesystem.
    pub available: u64,
}

impl SpaceReport {
    /// Check whether the destination can hold the transfer.
    pub fn has_space(&self) -> bool {
        self.required <= self.available
    }
}

impl std::fmt::Display for SpaceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "required {} ({} bytes), available {} ({} bytes)",
            size_to_human(self.required),
            self.required,
            size_to_human(self.available),
            self.available
        )
    }
}

/// Advisory free-space validation; the scheduler never calls this itself.
#[derive(Debug, Clone)]
pub struct SpaceGuard {
    probe: Arc<dyn SpaceProbe>,
}

impl SpaceGuard {
    /// Create a guard backed by `statvfs`.
    pub fn new() -> Self {
        Self::with_probe(Arc::new(StatvfsProbe))
    }

    /// Create a guard with a custom probe.
    pub fn with_probe(probe: Arc<dyn SpaceProbe>) -> Self {
        Self { probe }
    }

    /// Compute the space report for moving `files` to `destination`.
    pub fn check(&self, files: &[PathBuf], destination: &Path) -> Result<SpaceReport, TransferError> {
        let required: u64 = files
            .iter()
            .filter_map(|f| fs::metadata(f).ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum();

        // The destination may not exist yet; probe the nearest ancestor that does
        let probe_path = destination
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or(destination);
        let available = self
            .probe
            .free_bytes(probe_path)
            .map_err(|e| TransferError::io(probe_path, e))?;

        Ok(SpaceReport {
            required,
            available,
        })
    }

    /// Check whether `destination` can hold `files`; never fails.
    pub fn has_space(&self, files: &[PathBuf], destination: &Path) -> bool {
        match self.check(files, destination) {
            Ok(report) if report.has_space() => {
                info!(destination = %destination.display(), "space check passed: {report}");
                true
            }
            Ok(report) => {
                warn!(destination = %destination.display(), "insufficient space: {report}");
                false
            }
            Err(e) => {
                error!(destination = %destination.display(), error = %e, "space check failed");
                false
            }
        }
    }
}

impl Default for SpaceGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct FixedProbe(u64);

    impl SpaceProbe for FixedProbe {
        fn free_bytes(&self, _path: &Path) -> io::Result<u64> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_required_ignores_missing() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.mkv");
        fs::write(&a, vec![0u8; 100]).unwrap();

        let guard = SpaceGuard::with_probe(Arc::new(FixedProbe(1000)));
        let report = guard
            .check(&[a, temp.path().join("gone.mkv")], temp.path())
            .unwrap();
        assert_eq!(report.required, 100);
        assert_eq!(report.available, 1000);
        assert!(report.has_space());
    }

    #[test]
    fn test_report_display_has_both_numbers() {
        let report = SpaceReport {
            required: 10,
            available: 5,
        };
        let text = report.to_string();
        assert!(text.contains("10 bytes"));
        assert!(text.contains("5 bytes"));
        assert!(!report.has_space());
    }

    #[test]
    fn test_statvfs_probe_on_missing_destination() {
        let temp = TempDir::new().unwrap();
        let guard = SpaceGuard::new();
        let report = guard
            .check(&[], &temp.path().join("not/yet/created"))
            .unwrap();
        assert_eq!(report.required, 0);
        assert!(report.has_space());
    }
}
