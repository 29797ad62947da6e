//! Unified error types for remountd

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for remountd operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    // Mount errors
    #[error("Mount '{0}' not found")]
    MountNotFound(String),

    #[error("Mount lifecycle error: {0}")]
    Lifecycle(String),

    // Command errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command '{command}' timed out after {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },
}

impl Error {
    /// Whether this error means the peer actively refused the connection
    pub fn is_conn_refused(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::ConnectionRefused,
            Error::Errno(errno) => *errno == nix::errno::Errno::ECONNREFUSED,
            _ => false,
        }
    }
}

/// Result type alias for remountd operations
pub type Result<T> = std::result::Result<T, Error>;
