//! Error types for serving and configuration

use std::path::PathBuf;
use thiserror::Error;

/// Remote dispatch error type
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration file could not be used
    #[error("invalid configuration {path}: {reason}")]
    Config {
        /// File being loaded
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// A listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying failure
        source: std::io::Error,
    },

    /// YAML parsing failed
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Encoding or decoding a wire message failed
    #[error(transparent)]
    Protocol(#[from] wire_protocol::Error),

    /// The managed side reported a failure
    #[error(transparent)]
    Manager(#[from] process_manager::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error for `path`
    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
