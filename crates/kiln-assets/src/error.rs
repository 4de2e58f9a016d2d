use std::path::PathBuf;
use std::sync::Arc;

use crate::codec::CodecError;

/// Errors that can occur during asset loading.
///
/// `Clone` so a single failed load can be reported to every requester that
/// was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to parse '{0}': {1}")]
    ParseFailed(PathBuf, String),

    #[error("failed to load image '{0}': {1}")]
    ImageLoadFailed(PathBuf, String),

    #[error("mesh cache '{0}' is corrupt: {1}")]
    CacheCorrupt(PathBuf, #[source] CodecError),

    #[error("failed to write mesh cache '{0}': {1}")]
    CacheWrite(PathBuf, #[source] CodecError),

    #[error("I/O error on '{0}': {1}")]
    Io(PathBuf, #[source] Arc<std::io::Error>),

    #[error("loader task for '{0}' panicked: {1}")]
    TaskPanicked(PathBuf, String),

    #[error("task pool stopped before '{0}' could be loaded")]
    PoolStopped(PathBuf),

    #[error("failed to start task pool: {0}")]
    PoolStart(String),

    #[error("asset not loaded: {0}")]
    NotLoaded(PathBuf),

    #[error("invalid config '{0}': {1}")]
    Config(PathBuf, String),
}

impl AssetError {
    /// Wrap an I/O error, mapping `NotFound` to [`AssetError::NotFound`].
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            AssetError::NotFound(path)
        } else {
            AssetError::Io(path, Arc::new(err))
        }
    }
}
