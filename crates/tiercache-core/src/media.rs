//! Media file classification by extension.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "flv", "webm", "ts", "m2ts", "mpg", "mpeg", "vob",
    "iso", "3gp", "ogv",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "aac", "m4a", "ogg", "opus", "wav", "wma", "alac", "aiff", "ape", "dsf",
];

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "sub", "idx", "ass", "ssa", "vtt", "sup", "smi"];

/// Category of a file a media server may hold open while playing.
///
/// Files in any of these categories are moved with the atomic redirect so an
/// active reader is never cut off; everything else is copied and unlinked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

impl MediaKind {
    /// Extensions (lowercase, no dot) belonging to this category.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Video => VIDEO_EXTENSIONS,
            Self::Audio => AUDIO_EXTENSIONS,
            Self::Subtitle => SUBTITLE_EXTENSIONS,
        }
    }

    /// Classify an extension, ignoring case and a leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::iter().find(|kind| kind.extensions().contains(&ext.as_str()))
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}
