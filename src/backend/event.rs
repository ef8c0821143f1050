//! Asynchronous backend callbacks.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::debug;

use super::TaskHandle;
use crate::file::{FailureCause, PauseReason};

/// Something a backend observed about one of its tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The transfer started or resumed at `offset`.
    Resumed {
        task: TaskHandle,
        offset: u64,
        expected_total: Option<u64>,
    },
    /// More bytes arrived.
    Progress {
        task: TaskHandle,
        /// Bytes in this chunk.
        bytes_written: u64,
        total_written: u64,
        total_expected: Option<u64>,
    },
    /// The task is waiting for a slot.
    Queued { task: TaskHandle },
    Paused {
        task: TaskHandle,
        reason: PauseReason,
    },
    /// The transfer ended and the body sits at `location`.
    Finished {
        task: TaskHandle,
        location: PathBuf,
        http_status: Option<u16>,
        mime_type: Option<String>,
    },
    Failed {
        task: TaskHandle,
        cause: FailureCause,
    },
    /// The backend no longer knows the task.
    Vanished { task: TaskHandle },
    /// A status query against the backend failed; nothing is known.
    QueryFailed { task: TaskHandle, message: String },
    /// All deferred background events have been delivered.
    BackgroundEventsSettled,
}

impl BackendEvent {
    /// The task this event is about, if any.
    #[must_use]
    pub fn task(&self) -> Option<TaskHandle> {
        match self {
            Self::Resumed { task, .. }
            | Self::Progress { task, .. }
            | Self::Queued { task }
            | Self::Paused { task, .. }
            | Self::Finished { task, .. }
            | Self::Failed { task, .. }
            | Self::Vanished { task }
            | Self::QueryFailed { task, .. } => Some(*task),
            Self::BackgroundEventsSettled => None,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resumed { .. } => "resumed",
            Self::Progress { .. } => "progress",
            Self::Queued { .. } => "queued",
            Self::Paused { .. } => "paused",
            Self::Finished { .. } => "finished",
            Self::Failed { .. } => "failed",
            Self::Vanished { .. } => "vanished",
            Self::QueryFailed { .. } => "query_failed",
            Self::BackgroundEventsSettled => "background_events_settled",
        }
    }
}

/// Sending half handed to a backend.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl EventSink {
    /// Delivers `event`. Dropped silently once the manager is gone.
    pub fn emit(&self, event: BackendEvent) {
        if let Err(err) = self.tx.send(event) {
            debug!(event = err.0.kind(), "event receiver closed, dropping event");
        }
    }
}

/// Receiving half consumed by the manager.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<BackendEvent>,
}

impl EventStream {
    /// Waits for the next event; `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<BackendEvent> {
        self.rx.recv().await
    }
}

/// Creates a connected sink/stream pair.
#[must_use]
pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx })
}
