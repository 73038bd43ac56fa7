//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid source descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Transcoder unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Stream {stream_id}: could not connect to source: {reason}")]
    ConnectFailed { stream_id: String, reason: String },

    #[error("Stream {stream_id}: no playable segment within {}s", timeout.as_secs_f64())]
    TimedOut {
        stream_id: String,
        timeout: Duration,
    },

    #[error("Stream {stream_id}: transcoder exited unexpectedly: {reason}")]
    ProcessCrashed { stream_id: String, reason: String },

    #[error("Stream {stream_id} was stopped")]
    Stopped { stream_id: String },

    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Self::InvalidDescriptor(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Stage of the stream lifecycle the error originates from.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidDescriptor(_) => "resolve",
            Self::ToolUnavailable(_) => "spawn",
            Self::ConnectFailed { .. } | Self::TimedOut { .. } => "startup",
            Self::ProcessCrashed { .. } | Self::Stopped { .. } => "running",
            Self::InvalidPath(_) | Self::NotFound(_) => "delivery",
            Self::Configuration(_) | Self::IoPath { .. } | Self::Io(_) | Self::Other(_) => {
                "service"
            }
        }
    }
}
