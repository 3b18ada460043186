use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Repository not found at {path}")]
    RepositoryNotFound { path: String },

    #[error("Repository already exists at {path}")]
    RepositoryExists { path: String },

    #[error("Invalid repository format version: {version}")]
    InvalidFormatVersion { version: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid key")]
    InvalidKey,

    #[error("Nothing to index: the data tree is empty and there is no history")]
    EmptyIndex,

    #[error("Object not found: {id}")]
    NotFound { id: String },

    #[error("Object corrupted: {id} ({reason})")]
    Corrupt { id: String, reason: String },

    #[error("Digest collision on {id}: stored content differs from incoming content")]
    Collision { id: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoPath {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn join(e: tokio::task::JoinError) -> Self {
        Error::Io(std::io::Error::other(e))
    }

    pub(crate) fn not_found(id: impl ToString) -> Self {
        Error::NotFound { id: id.to_string() }
    }

    pub(crate) fn corrupt(id: impl ToString, reason: impl ToString) -> Self {
        Error::Corrupt {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether re-running the failed operation may succeed without changing
    /// its inputs.
    pub fn is_retryable(&self) -> bool {
        // Corruption, collisions and missing objects never heal on retry.
        matches!(self, Error::Io(_) | Error::IoPath { .. } | Error::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let io = Error::Io(std::io::Error::other("disk hiccup"));
        assert!(io.is_retryable());
        assert!(Error::Store("disk full".to_string()).is_retryable());

        assert!(!Error::EmptyIndex.is_retryable());
        assert!(!Error::corrupt("abcd", "hash mismatch").is_retryable());
        assert!(!Error::Collision { id: "abcd".to_string() }.is_retryable());
    }

    #[test]
    fn test_io_error_keeps_path_context() {
        let err = Error::io_at("data/foo", std::io::Error::other("denied"));
        assert!(err.to_string().contains("data/foo"));
    }
}
