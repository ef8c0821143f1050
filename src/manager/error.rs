//! Error types for the manager.

use thiserror::Error;

use crate::config::ConfigError;
use crate::file::{DownloadFileStatus, InvalidUrl};

/// Errors returned by [`DownloadManager`](super::DownloadManager) operations.
///
/// Backend and filesystem conditions are never reported here; they surface as
/// status transitions on the affected file.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    InvalidUrl(#[from] InvalidUrl),

    /// `start` was called on a file that already left `None`.
    #[error(
        "download already started: {url} is {status}\n  Suggestion: create a new file with create_download_file to download it again"
    )]
    AlreadyStarted {
        url: String,
        status: DownloadFileStatus,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
