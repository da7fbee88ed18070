//! Error types for shared memory operations
//!
//! "Not found" is deliberately absent: lookups that can miss return
//! `ShmResult<Option<_>>` and the caller sees `None`.

use shmkit::config::ConfigError;
use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Requested size, count, key or name is outside what the OS accepts
    #[error("{operation}: value out of range: {detail}")]
    OutOfRange {
        /// Operation that rejected the value
        operation: &'static str,
        /// Human readable description of the offending value
        detail: String,
    },

    /// OS call failed
    #[error("{operation} failed: {}", .source.desc())]
    Os {
        /// Name of the failing system call
        operation: &'static str,
        /// Errno reported by the OS
        source: nix::errno::Errno,
    },

    /// Detach of an address the kernel does not know about
    #[error("Stale handle: {key} is not attached at the tracked address")]
    StaleHandle {
        /// Resource key of the stale handle
        key: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {source}")]
    Json {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },

    /// Configuration error
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: ConfigError,
    },

    /// Installing the termination signal handler failed
    #[error("Signal handler error: {source}")]
    Signal {
        /// Source ctrlc error
        #[from]
        source: ctrlc::Error,
    },
}

impl ShmError {
    /// Build an [`ShmError::Os`] from a failed call.
    pub fn os(operation: &'static str, source: nix::errno::Errno) -> Self {
        Self::Os { operation, source }
    }

    /// Build an [`ShmError::OutOfRange`].
    pub fn out_of_range(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::OutOfRange {
            operation,
            detail: detail.into(),
        }
    }

    /// Errno carried by an OS failure, if any.
    pub fn errno(&self) -> Option<nix::errno::Errno> {
        match self {
            Self::Os { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// True for the RangeError class.
    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;
