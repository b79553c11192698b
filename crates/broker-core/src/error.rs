use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running the broker daemon
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Binding the listening socket failed
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing a stale socket file failed
    #[error("failed to remove stale socket {path}: {source}")]
    SocketCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A session key was generated twice
    #[error("duplicate session key: {0}")]
    DuplicateSessionKey(String),
}

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
