//! Translation between media-server paths, real paths and tier paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tiercache_core::{PathSubstitution, TierConfig, TransferWarning, WarningKind};

/// An external root as seen by the media server and the real root behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    /// Root as reported by the media server.
    pub external_root: PathBuf,
    /// Root on the local filesystem.
    pub real_root: PathBuf,
}

impl SourceMapping {
    /// Create a new mapping.
    pub fn new(external_root: impl Into<PathBuf>, real_root: impl Into<PathBuf>) -> Self {
        Self {
            external_root: external_root.into(),
            real_root: real_root.into(),
        }
    }

    /// Map `path` if it is a component-wise descendant of the external root.
    pub fn translate(&self, path: &Path) -> Option<PathBuf> {
        let rest = path.strip_prefix(&self.external_root).ok()?;
        Some(join_remainder(&self.real_root, rest))
    }
}

/// Join without producing a trailing separator for an empty remainder.
fn join_remainder(root: &Path, rest: &Path) -> PathBuf {
    if rest.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(rest)
    }
}

/// Maps external paths to real paths, and real paths to tier paths.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    /// Primary mapping first, then additional sources in configured order.
    mappings: Vec<SourceMapping>,
    additional_cache_root: PathBuf,
    cache_substitution: PathSubstitution,
    array_substitution: PathSubstitution,
    warnings: Vec<TransferWarning>,
}

impl PathTranslator {
    /// Build the ordered mapping list from configuration.
    ///
    /// When the additional external and real root lists differ in length,
    /// only the first `min(len)` pairs are used and a warning is recorded.
    pub fn new(config: &TierConfig) -> Self {
        let externals = &config.additional_external_roots;
        let reals = &config.additional_real_roots;
        let mut warnings = Vec::new();

        if externals.len() != reals.len() {
            let used = externals.len().min(reals.len());
            warn!(
                external = externals.len(),
                real = reals.len(),
                used,
                "additional source lists have different lengths; extra entries ignored"
            );
            warnings.push(TransferWarning::new(
                None,
                format!(
                    "{} additional external roots but {} real roots; using the first {}",
                    externals.len(),
                    reals.len(),
                    used
                ),
                WarningKind::MappingMismatch,
            ));
        }

        let mut mappings = Vec::with_capacity(1 + externals.len().min(reals.len()));
        mappings.push(SourceMapping::new(
            &config.primary_external_root,
            &config.primary_real_root,
        ));
        mappings.extend(
            externals
                .iter()
                .zip(reals)
                .map(|(external, real)| SourceMapping::new(external, real)),
        );

        Self {
            mappings,
            additional_cache_root: config.additional_cache_root.clone(),
            cache_substitution: config.cache_substitution.clone(),
            array_substitution: config.array_substitution.clone(),
            warnings,
        }
    }

    /// All mappings in evaluation order.
    pub fn mappings(&self) -> &[SourceMapping] {
        &self.mappings
    }

    /// Additional-source mappings (everything after the primary).
    pub fn additional_mappings(&self) -> &[SourceMapping] {
        &self.mappings[1..]
    }

    /// Warnings raised while building the mapping list.
    pub fn warnings(&self) -> &[TransferWarning] {
        &self.warnings
    }

    /// Translate a list of external paths to real paths.
    ///
    /// Entries are trimmed and empty ones dropped. Paths matching no mapping
    /// are assumed to be real already and pass through unchanged.
    pub fn translate<S: AsRef<str>>(&self, paths: &[S]) -> Vec<PathBuf> {
        paths
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|p| self.translate_one(Path::new(p)))
            .collect()
    }

    /// Translate a single path; the first matching mapping wins.
    pub fn translate_one(&self, path: &Path) -> PathBuf {
        match self.mappings.iter().find_map(|m| m.translate(path)) {
            Some(real) => {
                debug!(from = %path.display(), to = %real.display(), "translated path");
                real
            }
            None => path.to_path_buf(),
        }
    }

    /// Cache-tier destination for a file under an additional source.
    ///
    /// Returns `None` for anything else, in which case the caller applies
    /// the default convention (see [`PathTranslator::cache_path`]).
    pub fn cache_destination(&self, real_path: &Path) -> Option<PathBuf> {
        self.additional_mappings().iter().find_map(|m| {
            real_path
                .strip_prefix(&m.real_root)
                .ok()
                .map(|rest| join_remainder(&self.additional_cache_root, rest))
        })
    }

    /// Cache-tier location of a real path.
    pub fn cache_path(&self, real_path: &Path) -> PathBuf {
        self.cache_destination(real_path)
            .unwrap_or_else(|| self.cache_substitution.apply(real_path))
    }

    /// Array-tier location of a real path.
    pub fn array_path(&self, real_path: &Path) -> PathBuf {
        self.array_substitution.apply(real_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator(externals: &[&str], reals: &[&str]) -> PathTranslator {
        let config = TierConfig::builder()
            .primary_external_root("/data")
            .primary_real_root("/mnt/user")
            .additional_external_roots(externals.iter().map(PathBuf::from).collect::<Vec<_>>())
            .additional_real_roots(reals.iter().map(PathBuf::from).collect::<Vec<_>>())
            .additional_cache_root("/mnt/cache/remote")
            .build()
            .unwrap();
        PathTranslator::new(&config)
    }

    #[test]
    fn test_translate_primary() {
        let t = translator(&[], &[]);
        let out = t.translate(&["/data/Movies/Film (2020)/Film.mkv"]);
        assert_eq!(out, vec![PathBuf::from("/mnt/user/Movies/Film (2020)/Film.mkv")]);
    }

    #[test]
    fn test_translate_is_structural() {
        let t = translator(&["/nas"], &["/mnt/remotes/nas"]);
        // "/database" shares a string prefix with "/data" but is not under it
        let out = t.translate(&["/database/x.mkv", "/nas2/y.mkv", "/nas/z.mkv"]);
        assert_eq!(
            out,
            vec![
                PathBuf::from("/database/x.mkv"),
                PathBuf::from("/nas2/y.mkv"),
                PathBuf::from("/mnt/remotes/nas/z.mkv"),
            ]
        );
    }

    #[test]
    fn test_translate_trims_and_drops_empty() {
        let t = translator(&[], &[]);
        let out = t.translate(&["  /data/a.mkv\n", "", "   "]);
        assert_eq!(out, vec![PathBuf::from("/mnt/user/a.mkv")]);
    }

    #[test]
    fn test_first_match_wins() {
        let t = translator(&["/data/tv", "/data"], &["/mnt/remotes/tv", "/mnt/remotes/all"]);
        // The primary mapping is evaluated first and covers /data/tv too
        assert_eq!(
            t.translate_one(Path::new("/data/tv/show.mkv")),
            PathBuf::from("/mnt/user/tv/show.mkv")
        );
    }

    #[test]
    fn test_mismatched_lists_truncate() {
        let t = translator(&["/a", "/b", "/c"], &["/mnt/a", "/mnt/b"]);
        assert_eq!(t.additional_mappings().len(), 2);
        assert_eq!(t.warnings().len(), 1);
        assert_eq!(t.warnings()[0].kind, WarningKind::MappingMismatch);
        // The dropped third root passes through unchanged
        assert_eq!(
            t.translate_one(Path::new("/c/file.mkv")),
            PathBuf::from("/c/file.mkv")
        );
    }

    #[test]
    fn test_cache_destination() {
        let t = translator(&["/nas"], &["/mnt/remotes/nas"]);
        assert_eq!(
            t.cache_destination(Path::new("/mnt/remotes/nas/tv/ep.mkv")),
            Some(PathBuf::from("/mnt/cache/remote/tv/ep.mkv"))
        );
        assert_eq!(t.cache_destination(Path::new("/mnt/user/tv/ep.mkv")), None);
        assert_eq!(
            t.cache_path(Path::new("/mnt/user/tv/ep.mkv")),
            PathBuf::from("/mnt/cache/tv/ep.mkv")
        );
    }

    #[test]
    fn test_array_path() {
        let t = translator(&[], &[]);
        assert_eq!(
            t.array_path(Path::new("/mnt/user/tv/ep.mkv")),
            PathBuf::from("/mnt/user0/tv/ep.mkv")
        );
        assert_eq!(
            t.array_path(Path::new("/mnt/remotes/nas/ep.mkv")),
            PathBuf::from("/mnt/remotes/nas/ep.mkv")
        );
    }
}
