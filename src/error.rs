//! Error types for the watch subsystem.
//!
//! Resolution and backend-selection failures are handled locally with a
//! documented fallback; resource exhaustion and platform incapability are
//! surfaced to the caller since they change delivery guarantees. No error
//! terminates the subsystem as a whole.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from watch operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// A symlink target is missing or broken. Callers degrade to watching
    /// the literal path; subscribing does not fail on this.
    #[error("Failed to resolve {path}: {reason}")]
    Resolution { path: PathBuf, reason: String },

    /// The native notification capability is absent for this platform or
    /// path. Falls back to polling when the caller allows it.
    #[error("Native watching unavailable for {path}: {reason}")]
    BackendUnavailable { path: PathBuf, reason: String },

    /// The OS watch-descriptor limit was hit. Never silently dropped.
    #[error("Watch descriptor limit reached while watching {path}")]
    ResourceExhausted { path: PathBuf },

    #[error("File system error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watch channel closed unexpectedly")]
    ChannelClosed,
}

impl WatchError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        WatchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn unavailable(path: &Path, reason: impl Into<String>) -> Self {
        WatchError::BackendUnavailable {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
