//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading, writing, or mutating a
/// [`crate::ConfigStore`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to read or write a configuration file.
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("failed to parse configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Malformed JSON5 input (unterminated string or block comment).
    #[error("invalid JSON5: {0}")]
    Json5(String),

    /// `append` was called against a path whose existing value is not an
    /// array.
    #[error("target key is not an array: {0}")]
    NotAnArray(String),

    /// `remove` (or a traversal through a non-object segment) could not
    /// locate the requested path.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A subscriber callback attempted to mutate the store it was notified
    /// from.
    #[error("reentrant configuration mutation denied: {0}")]
    ReentrancyDenied(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
