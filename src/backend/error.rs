//! Error types for the backend module.

use std::path::PathBuf;

use thiserror::Error;

use super::TaskHandle;

/// Errors returned by [`NativeBackend`](super::NativeBackend) calls.
///
/// These never reach the caller of the manager directly; the manager turns
/// them into `Failed` transitions with a structured cause.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request URL was rejected.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },

    /// The handle does not name a task this backend owns.
    #[error("unknown task {task}")]
    UnknownTask {
        /// The unknown handle.
        task: TaskHandle,
    },

    /// The external download service refused the call.
    #[error("download service error: {message}")]
    Service {
        /// Service-provided description.
        message: String,
    },

    /// Staging directory or file error.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {source}\n  Suggestion: check TLS and proxy settings")]
    Http {
        #[source]
        source: reqwest::Error,
    },
}

impl BackendError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a service error.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
