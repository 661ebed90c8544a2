use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;

/// Fatal job errors. Per-candidate rebuild failures never surface here; they
/// are recorded as [`crate::rebuild::RebuildStatus::Failed`] outcomes instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Credential '{0}' not found in any credential store")]
    CredentialNotFound(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Connection error: {0}")]
    Connection(#[source] DbError),

    #[error("Fragmentation scan failed: {0}")]
    Scan(#[source] DbError),

    #[error("Checkpoint error at {}: {source}", .path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {} is corrupt: {reason}", .path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error(
        "Checkpoint belongs to a different job ({found}); expected {expected}. \
         Use --fresh or `reset` to discard it"
    )]
    CheckpointMismatch { expected: String, found: String },
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
