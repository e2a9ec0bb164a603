//! Tier configuration.

use std::fs;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::ConfigError;
use crate::media::MediaKind;

/// How a cached file is made visible at its original path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    /// Temp symlink renamed over the source; readers are never interrupted.
    #[default]
    Atomic,
    /// Degraded mode: move the file, then symlink the old path to it.
    ///
    /// There is a window in which the path does not exist, so a reader that
    /// opens the file during the move fails.
    Direct,
}

/// A fixed substring replacement mapping one tier's paths to another's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSubstitution {
    /// Substring identifying the source tier (e.g. `/mnt/user/`).
    pub from: String,
    /// Replacement for the target tier (e.g. `/mnt/user0/`).
    pub to: String,
}

impl PathSubstitution {
    /// Create a new substitution.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Apply the substitution once; paths without the substring are unchanged.
    pub fn apply(&self, path: &Path) -> PathBuf {
        match path.to_str() {
            Some(s) if !self.from.is_empty() && s.contains(&self.from) => {
                PathBuf::from(s.replacen(&self.from, &self.to, 1))
            }
            _ => path.to_path_buf(),
        }
    }

    /// Check whether the substitution applies to a path.
    pub fn matches(&self, path: &Path) -> bool {
        !self.from.is_empty() && path.to_str().is_some_and(|s| s.contains(&self.from))
    }
}

/// Configuration for the transfer engine.
///
/// Immutable once built; the engine takes its own copy at construction.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default, deny_unknown_fields)]
pub struct TierConfig {
    /// Root as seen by the media server for the primary library.
    #[builder(default = "PathBuf::from(\"/data\")")]
    pub primary_external_root: PathBuf,

    /// Real filesystem root backing `primary_external_root`.
    #[builder(default = "PathBuf::from(\"/mnt/user\")")]
    pub primary_real_root: PathBuf,

    /// Additional (network-attached) roots as seen by the media server.
    #[builder(default)]
    pub additional_external_roots: Vec<PathBuf>,

    /// Real roots backing `additional_external_roots`, index for index.
    #[builder(default)]
    pub additional_real_roots: Vec<PathBuf>,

    /// Cache-tier root receiving files from additional sources.
    #[builder(default = "PathBuf::from(\"/mnt/cache\")")]
    pub additional_cache_root: PathBuf,

    /// Default convention mapping primary-root files to the cache tier.
    #[builder(default = "default_cache_substitution()")]
    pub cache_substitution: PathSubstitution,

    /// Mapping from a real path to its array-tier location.
    #[builder(default = "default_array_substitution()")]
    pub array_substitution: PathSubstitution,

    /// Worker count for transfers from local disks.
    #[builder(default = "5")]
    pub local_workers: usize,

    /// Worker count for transfers from network-attached sources.
    #[builder(default = "2")]
    pub network_workers: usize,

    /// Extensions treated as media in addition to the built-in sets.
    #[builder(default)]
    pub extra_media_extensions: Vec<String>,

    /// How cached media is made visible at its original path.
    #[builder(default)]
    pub redirect_mode: RedirectMode,
}

fn default_cache_substitution() -> PathSubstitution {
    PathSubstitution::new("/mnt/user/", "/mnt/cache/")
}

fn default_array_substitution() -> PathSubstitution {
    PathSubstitution::new("/mnt/user/", "/mnt/user0/")
}

impl TierConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let defaults = TierConfig::default();
        check_settings(
            self.local_workers.unwrap_or(defaults.local_workers),
            self.network_workers.unwrap_or(defaults.network_workers),
            [
                self.cache_substitution
                    .as_ref()
                    .unwrap_or(&defaults.cache_substitution),
                self.array_substitution
                    .as_ref()
                    .unwrap_or(&defaults.array_substitution),
            ],
        )
        .map_err(str::to_string)
    }
}

/// Constraints shared by the builder and loaded files.
fn check_settings(
    local_workers: usize,
    network_workers: usize,
    substitutions: [&PathSubstitution; 2],
) -> Result<(), &'static str> {
    if local_workers == 0 {
        return Err("local_workers must be at least 1");
    }
    if network_workers == 0 {
        return Err("network_workers must be at least 1");
    }
    if substitutions.iter().any(|sub| sub.from.is_empty()) {
        return Err("path substitution must have a non-empty `from`");
    }
    Ok(())
}

impl TierConfig {
    /// Create a new config builder.
    pub fn builder() -> TierConfigBuilder {
        TierConfigBuilder::default()
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tiercache").join("config.toml"))
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Check values that serde cannot enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_settings(
            self.local_workers,
            self.network_workers,
            [&self.cache_substitution, &self.array_substitution],
        )
        .map_err(|message| ConfigError::Invalid {
            message: message.to_string(),
        })
    }

    /// Check whether a path should get the reader-safe redirect.
    pub fn is_media(&self, path: &Path) -> bool {
        if MediaKind::from_path(path).is_some() {
            return true;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extra_media_extensions
            .iter()
            .any(|extra| extra.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Check whether `path` lies under one of the additional real roots.
    pub fn is_network_path(&self, path: &Path) -> bool {
        self.additional_real_roots
            .iter()
            .any(|root| path.starts_with(root))
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            primary_external_root: PathBuf::from("/data"),
            primary_real_root: PathBuf::from("/mnt/user"),
            additional_external_roots: Vec::new(),
            additional_real_roots: Vec::new(),
            additional_cache_root: PathBuf::from("/mnt/cache"),
            cache_substitution: default_cache_substitution(),
            array_substitution: default_array_substitution(),
            local_workers: 5,
            network_workers: 2,
            extra_media_extensions: Vec::new(),
            redirect_mode: RedirectMode::Atomic,
        }
    }
}
