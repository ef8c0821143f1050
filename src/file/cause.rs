//! Structured causes recorded in `status_details`.

use std::fmt;

use thiserror::Error;

/// Why a download ended in `Failed`.
///
/// The display form is what lands in the file's `status_details`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    /// The server answered with an error status.
    #[error("Error.HttpCode: {0}")]
    HttpStatus(u16),
    #[error("Error.CannotResume")]
    CannotResume,
    #[error("Error.DeviceNotFound")]
    DeviceNotFound,
    #[error("Error.FileAlreadyExists")]
    FileAlreadyExists,
    #[error("Error.FileError")]
    FileError,
    #[error("Error.HttpDataError")]
    HttpDataError,
    #[error("Error.InsufficientSpace")]
    InsufficientSpace,
    #[error("Error.TooManyRedirects")]
    TooManyRedirects,
    #[error("Error.UnhandledHttpCode")]
    UnhandledHttpCode,
    #[error("Error.Unknown")]
    Unknown,
    /// A reason code the service documents nowhere.
    #[error("Error.Unregistered: {0}")]
    Unregistered(i32),
    /// Transport-level failure described by the backend.
    #[error("{0}")]
    Transfer(String),
    /// The backend refused to create or start a task.
    #[error("Error.TaskCreation: {0}")]
    TaskCreation(String),
    /// The finished download could not be moved to its destination.
    #[error("Error.Relocation: {0}")]
    Relocation(String),
}

impl FailureCause {
    /// Maps a polling-service failure reason code.
    ///
    /// Codes below 600 are HTTP status codes; 1000..=1009 are service errors.
    #[must_use]
    pub fn from_reason_code(code: i32) -> Self {
        if (0..600).contains(&code) {
            return u16::try_from(code).map_or(Self::Unregistered(code), Self::HttpStatus);
        }
        match code {
            1000 => Self::Unknown,
            1001 => Self::FileError,
            1002 => Self::UnhandledHttpCode,
            1004 => Self::HttpDataError,
            1005 => Self::TooManyRedirects,
            1006 => Self::InsufficientSpace,
            1007 => Self::DeviceNotFound,
            1008 => Self::CannotResume,
            1009 => Self::FileAlreadyExists,
            other => Self::Unregistered(other),
        }
    }
}

/// Why the backend paused a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    WaitingToRetry,
    WaitingForNetwork,
    QueuedForWifi,
    Unknown,
    Unregistered(i32),
}

impl PauseReason {
    /// Maps a polling-service pause reason code.
    #[must_use]
    pub fn from_reason_code(code: i32) -> Self {
        match code {
            1 => Self::WaitingToRetry,
            2 => Self::WaitingForNetwork,
            3 => Self::QueuedForWifi,
            4 => Self::Unknown,
            other => Self::Unregistered(other),
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingToRetry => write!(f, "Paused.WaitingToRetry"),
            Self::WaitingForNetwork => write!(f, "Paused.WaitingForNetwork"),
            Self::QueuedForWifi => write!(f, "Paused.QueuedForWifi"),
            Self::Unknown => write!(f, "Paused.Unknown"),
            Self::Unregistered(code) => write!(f, "Paused.Unregistered: {code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_details() {
        assert_eq!(FailureCause::HttpStatus(404).to_string(), "Error.HttpCode: 404");
    }

    #[test]
    fn test_transfer_details_are_verbatim() {
        assert_eq!(FailureCause::Transfer("timeout".into()).to_string(), "timeout");
    }

    #[test]
    fn test_reason_codes_below_600_are_http() {
        assert_eq!(FailureCause::from_reason_code(503), FailureCause::HttpStatus(503));
    }

    #[test]
    fn test_service_reason_codes() {
        assert_eq!(FailureCause::from_reason_code(1006), FailureCause::InsufficientSpace);
        assert_eq!(FailureCause::from_reason_code(1008), FailureCause::CannotResume);
        assert_eq!(
            FailureCause::from_reason_code(1003).to_string(),
            "Error.Unregistered: 1003"
        );
    }

    #[test]
    fn test_pause_reason_display() {
        assert_eq!(
            PauseReason::from_reason_code(2).to_string(),
            "Paused.WaitingForNetwork"
        );
        assert_eq!(
            PauseReason::from_reason_code(9).to_string(),
            "Paused.Unregistered: 9"
        );
    }
}
