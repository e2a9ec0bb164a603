//! Boundary to the catalog service that knows what is being watched.

use std::convert::Infallible;

/// Supplies candidate files, as paths reported by the media server.
///
/// Implementations typically query the media server for in-progress and
/// upcoming items; the engine only needs the resulting path list.
pub trait MediaSource {
    /// Error raised when the catalog cannot be queried.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current candidate paths, in external (media-server) form.
    fn candidates(&self) -> Result<Vec<String>, Self::Error>;
}

/// A fixed candidate list, e.g. read from a file or stdin.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    paths: Vec<String>,
}

impl StaticSource {
    /// Create a source from a list of paths.
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

impl MediaSource for StaticSource {
    type Error = Infallible;

    fn candidates(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.paths.clone())
    }
}
