use std::path::PathBuf;
use thiserror::Error;

/// Failures reading or writing the password state file
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state file {path} has invalid company id {key:?}")]
    InvalidCompanyId { path: PathBuf, key: String },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why an admin session ended
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("admin login rejected: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Unexpected failure inside a command handler
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}
