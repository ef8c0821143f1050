//! Download file status definitions and the transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a download file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFileStatus {
    /// Created, never started.
    #[default]
    None,
    /// Accepted by the manager, not yet handed to the backend.
    Initialized,
    /// Handed to the backend, not yet transferring.
    Pending,
    /// Transferring.
    Running,
    /// Suspended by the backend (network unavailable, waiting to retry, ...).
    Paused,
    /// The backend is tearing the task down; resolves to `Canceled`.
    Canceling,
    /// Downloaded and placed at its destination.
    Completed,
    /// Transfer or placement failed.
    Failed,
    /// Aborted, superseded, or vanished from the backend.
    Canceled,
}

/// Events that move a file through its states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `start` accepted the file.
    Accepted,
    /// The manager created a backend task for the file.
    HandedOff,
    /// The backend reports the task as queued.
    Queued,
    /// The backend started or resumed the transfer.
    Resumed,
    /// The backend reported written bytes.
    Progressed,
    /// The backend paused the transfer.
    Paused,
    /// The transfer finished and the file is in place.
    Succeeded,
    /// The transfer or its placement failed.
    Failed,
    /// The caller aborted the file, or a newer start superseded it.
    Aborted,
    /// The backend no longer knows the task.
    Vanished,
}

impl DownloadFileStatus {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Initialized => "initialized",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Canceling => "canceling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Returns true for `Completed`, `Failed` and `Canceled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns true while the file is owned by a queue (started and not terminal).
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Self::None
    }

    /// Returns the state reached by applying `trigger`, or `None` when the
    /// transition is not allowed from this state.
    #[must_use]
    pub fn next(self, trigger: Trigger) -> Option<Self> {
        use DownloadFileStatus as S;

        if self.is_terminal() {
            return None;
        }

        match (self, trigger) {
            (S::None, Trigger::Accepted) => Some(S::Initialized),
            (S::Initialized, Trigger::HandedOff) => Some(S::Pending),
            (S::Initialized | S::Pending | S::Paused, Trigger::Queued) => Some(S::Pending),
            (
                S::Initialized | S::Pending | S::Running | S::Paused,
                Trigger::Resumed | Trigger::Progressed,
            ) => Some(S::Running),
            (S::Pending | S::Running | S::Paused, Trigger::Paused) => Some(S::Paused),
            (_, Trigger::Succeeded) => Some(S::Completed),
            (S::Canceling, Trigger::Failed) => Some(S::Canceled),
            (_, Trigger::Failed) => Some(S::Failed),
            (_, Trigger::Aborted | Trigger::Vanished) => Some(S::Canceled),
            _ => None,
        }
    }

    /// Whether entering this state clears `status_details`.
    pub(crate) fn clears_details(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Completed)
    }

    /// Whether entering this state records `status_details`.
    pub(crate) fn records_details(self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }
}

impl fmt::Display for DownloadFileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadFileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "initialized" => Ok(Self::Initialized),
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "canceling" => Ok(Self::Canceling),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}
