//! Native transfer backends.
//!
//! The manager drives every download through the [`NativeBackend`] trait and
//! learns about progress only through [`BackendEvent`]s delivered on an
//! [`EventStream`]. Two engines are provided:
//!
//! - [`HttpBackend`] - a continuous-session engine that streams bodies with
//!   `reqwest` and enforces a per-host connection limit
//! - [`PollingBackend`] - an adapter over an external [`DownloadService`] that
//!   is polled by a background watcher
//!
//! # Example
//!
//! ```no_run
//! use download_manager_core::backend::{HttpBackend, event_channel};
//! use download_manager_core::config::BackendConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, events) = event_channel();
//! let backend = HttpBackend::new(BackendConfig::default(), std::env::temp_dir(), sink)?;
//! # drop((backend, events));
//! # Ok(())
//! # }
//! ```

mod constants;
mod error;
mod event;
mod http;
mod polling;

pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use error::BackendError;
pub use event::{BackendEvent, EventSink, EventStream, event_channel};
pub use http::HttpBackend;
pub use polling::{
    DownloadService, PollingBackend, ServiceRecord, ServiceRequest, ServiceStatus,
};

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::file::Headers;

/// Opaque identifier of a backend task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskHandle(u64);

impl TaskHandle {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Which session flavour a task is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Continuous session that keeps transferring while the process is suspended.
    #[default]
    Background,
    /// Session scheduled immediately, without discretionary deferral.
    Foreground,
}

impl SessionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Foreground => "foreground",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a backend needs to create a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub url: String,
    pub headers: Headers,
    /// Whether the transfer may use a metered network.
    pub allows_cellular_access: bool,
    /// Intended final location, when known up front.
    pub destination: Option<PathBuf>,
    pub session: SessionKind,
}

/// Task state as reported by the backend when enumerating owned tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTaskState {
    Pending,
    Running,
    Suspended,
    Canceling,
    Completed,
    Failed,
}

impl NativeTaskState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A task the backend already owns, typically surviving a process restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedTask {
    pub handle: TaskHandle,
    pub state: NativeTaskState,
    /// Original request URL.
    pub url: String,
    /// Original request headers.
    pub headers: Headers,
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
}

/// A platform transfer engine.
///
/// Calls return once the request has been issued; results arrive later as
/// [`BackendEvent`]s. Implementations own their internal concurrency.
#[async_trait]
pub trait NativeBackend: Send + Sync {
    /// Creates a task for `request` without starting it.
    async fn create_task(&self, request: &TaskRequest) -> Result<TaskHandle, BackendError>;

    /// Starts or resumes the task.
    async fn resume(&self, task: TaskHandle) -> Result<(), BackendError>;

    /// Cancels the task. Cancelling an unknown task is not an error.
    async fn cancel(&self, task: TaskHandle) -> Result<(), BackendError>;

    /// Lists tasks the backend already owns.
    async fn owned_tasks(&self) -> Result<Vec<OwnedTask>, BackendError>;
}
