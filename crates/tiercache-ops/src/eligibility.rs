//! Tier eligibility filtering.
//!
//! Decisions are pure existence checks against the translator's tier paths:
//! no hashing and no timestamp comparison, so re-running a filter after a
//! partially failed batch simply picks up whatever is still left to move.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::paths::PathTranslator;

/// Check whether any directory entry exists at `path`, dangling symlinks included.
pub(crate) fn entry_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Narrows candidate lists to files that actually need to change tier.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    translator: Arc<PathTranslator>,
}

impl EligibilityFilter {
    /// Create a filter using the given translator's tier mapping.
    pub fn new(translator: Arc<PathTranslator>) -> Self {
        Self { translator }
    }

    /// Files that live only on the array tier and should be cached.
    pub fn for_cache(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        files
            .iter()
            .filter(|file| self.is_cache_eligible(file))
            .cloned()
            .collect()
    }

    /// Files that live only on the cache tier and should go back to the array.
    pub fn for_array(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        files
            .iter()
            .filter(|file| self.is_array_eligible(file))
            .cloned()
            .collect()
    }

    /// The file exists, nothing is at its cache path, and its array copy exists.
    pub fn is_cache_eligible(&self, file: &Path) -> bool {
        if !file.exists() {
            debug!(path = %file.display(), "not cache eligible: missing");
            return false;
        }
        let cache = self.translator.cache_path(file);
        if entry_exists(&cache) {
            debug!(path = %file.display(), cache = %cache.display(), "already cached");
            return false;
        }
        let array = self.translator.array_path(file);
        let eligible = entry_exists(&array);
        if !eligible {
            debug!(path = %file.display(), array = %array.display(), "no array copy");
        }
        eligible
    }

    /// The file exists, nothing is at its array path, and its cache copy exists.
    pub fn is_array_eligible(&self, file: &Path) -> bool {
        if !file.exists() {
            debug!(path = %file.display(), "not array eligible: missing");
            return false;
        }
        let array = self.translator.array_path(file);
        if entry_exists(&array) {
            debug!(path = %file.display(), array = %array.display(), "already on array");
            return false;
        }
        let cache = self.translator.cache_path(file);
        let eligible = entry_exists(&cache);
        if !eligible {
            debug!(path = %file.display(), cache = %cache.display(), "no cache copy");
        }
        eligible
    }
}
