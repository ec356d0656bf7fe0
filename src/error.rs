use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure reported by an embedding provider
#[derive(Error, Debug, Clone)]
#[error("embedding provider '{provider}' failed: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("index build failed: {0}")]
    Build(String),

    #[error("no semantic index has been published yet; run `vaultsync index` or wait for the first sync")]
    IndexUnavailable,

    #[error("vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid note path '{0}': must be relative and stay inside the vault")]
    InvalidPath(String),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<heed::Error> for SyncError {
    fn from(err: heed::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<arroy::Error> for SyncError {
    fn from(err: arroy::Error) -> Self {
        Self::Build(err.to_string())
    }
}
