use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cannot list directory {path}: {source}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Batch {batch} failed after retry ({committed} rows committed before it): {source}")]
    Transaction {
        batch: usize,
        committed: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Not a model database backup: {0}")]
    InvalidBackup(PathBuf),

    #[error("Scan root does not exist or is not a directory: {0}")]
    RootNotFound(PathBuf),

    #[error("Walker failed: {0}")]
    Worker(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Failures surfaced by a render backend or the scheduler around it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("render backend failed: {0}")]
    Backend(String),

    #[error("unsupported model format: {0}")]
    Unsupported(String),

    #[error("render surface was lost")]
    ContextLost,

    #[error("could not create render surface: {0}")]
    SurfaceUnavailable(String),

    #[error("render cancelled")]
    Cancelled,
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Backend(err.to_string())
    }
}
