//! Polling-service backend.
//!
//! Some platforms only expose a download service that accepts requests and
//! answers status queries. [`PollingBackend`] adapts such a service to
//! [`NativeBackend`]: a watcher task queries every watched transfer once per
//! `watcher_poll_interval` and turns observed changes into [`BackendEvent`]s.
//! The watcher stops when nothing is left to watch and restarts on the next
//! `resume`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::{
    BackendError, BackendEvent, EventSink, NativeBackend, NativeTaskState, OwnedTask, TaskHandle,
    TaskRequest,
};
use crate::config::{BackendConfig, NotificationVisibility};
use crate::file::{FailureCause, Headers, PauseReason};

/// Request handed to the download service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub url: String,
    pub headers: Headers,
    pub destination: Option<PathBuf>,
    pub allowed_over_metered: bool,
    pub notification_visibility: NotificationVisibility,
    pub visible_in_downloads_ui: bool,
}

/// Status column of a service row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Pending,
    Running,
    /// Paused with a service reason code.
    Paused { reason: i32 },
    Successful {
        local_path: PathBuf,
        media_type: Option<String>,
    },
    /// Failed with a service reason code (HTTP status below 600).
    Failed { reason: i32 },
}

impl ServiceStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful { .. } | Self::Failed { .. })
    }

    fn native_state(&self) -> NativeTaskState {
        match self {
            Self::Pending => NativeTaskState::Pending,
            Self::Running => NativeTaskState::Running,
            Self::Paused { .. } => NativeTaskState::Suspended,
            Self::Successful { .. } => NativeTaskState::Completed,
            Self::Failed { .. } => NativeTaskState::Failed,
        }
    }
}

/// One row of the download service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub id: u64,
    pub url: String,
    pub headers: Headers,
    pub bytes_so_far: u64,
    /// Total size; `None` while unknown.
    pub total_size: Option<u64>,
    pub status: ServiceStatus,
}

/// An external download service that is polled for status.
#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Submits a request and returns its service id.
    async fn enqueue(&self, request: &ServiceRequest) -> Result<u64, BackendError>;

    /// Looks up a row; `Ok(None)` when the service no longer knows the id.
    async fn query(&self, id: u64) -> Result<Option<ServiceRecord>, BackendError>;

    /// Removes a row, stopping its transfer.
    async fn remove(&self, id: u64) -> Result<(), BackendError>;

    /// Lists every row.
    async fn list(&self) -> Result<Vec<ServiceRecord>, BackendError>;
}

/// Last values seen for a watched task.
#[derive(Debug, Clone, Default)]
struct Observed {
    bytes_so_far: u64,
    status: Option<ServiceStatus>,
}

struct Shared {
    service: Arc<dyn DownloadService>,
    config: BackendConfig,
    sink: EventSink,
    watched: DashMap<TaskHandle, Observed>,
    watcher: Mutex<Option<CancellationToken>>,
}

/// [`NativeBackend`] over a polled [`DownloadService`].
#[derive(Clone)]
pub struct PollingBackend {
    shared: Arc<Shared>,
}

impl PollingBackend {
    #[must_use]
    pub fn new(service: Arc<dyn DownloadService>, config: BackendConfig, sink: EventSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                config,
                sink,
                watched: DashMap::new(),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Whether the watcher task is currently running.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.shared
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Number of tasks the watcher polls.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.shared.watched.len()
    }

    /// Stops the watcher without forgetting watched tasks.
    pub fn shutdown(&self) {
        if let Some(token) = self
            .shared
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    fn ensure_watcher(&self) {
        let mut watcher = self
            .shared
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if watcher.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return;
        }
        let token = CancellationToken::new();
        *watcher = Some(token.clone());
        drop(watcher);

        debug!(
            interval_ms = self.shared.config.watcher_poll_interval.as_millis(),
            "starting download watcher"
        );
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            watch(shared, token).await;
        });
    }
}

async fn watch(shared: Arc<Shared>, token: CancellationToken) {
    let mut interval = tokio::time::interval(shared.config.watcher_poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = interval.tick() => {
                if shared.stop_if_idle(&token) {
                    break;
                }
                shared.poll_once().await;
            }
        }
    }
    debug!("download watcher stopped");
}

impl Shared {
    /// Stops the watcher when nothing is watched. Checked under the watcher
    /// lock so a concurrent `resume` either sees the stop or is seen by it.
    fn stop_if_idle(&self, token: &CancellationToken) -> bool {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.watched.is_empty() {
            return false;
        }
        token.cancel();
        if watcher.as_ref().is_some_and(|current| current.is_cancelled()) {
            *watcher = None;
        }
        true
    }

    async fn poll_once(&self) {
        let mut handles: Vec<TaskHandle> = self.watched.iter().map(|e| *e.key()).collect();
        handles.sort();

        for task in handles {
            match self.service.query(task.id()).await {
                Err(err) => {
                    self.sink.emit(BackendEvent::QueryFailed {
                        task,
                        message: err.to_string(),
                    });
                }
                Ok(None) => {
                    if self.watched.remove(&task).is_some() {
                        debug!(task = %task, "task vanished from download service");
                        self.sink.emit(BackendEvent::Vanished { task });
                    }
                }
                Ok(Some(record)) => self.observe(task, record),
            }
        }
    }

    fn observe(&self, task: TaskHandle, record: ServiceRecord) {
        // Cancelled between the snapshot and the query.
        let Some(previous) = self.watched.get(&task).map(|e| e.value().clone()) else {
            return;
        };
        trace!(task = %task, bytes = record.bytes_so_far, status = ?record.status, "polled");

        if record.bytes_so_far != previous.bytes_so_far {
            self.sink.emit(BackendEvent::Progress {
                task,
                bytes_written: record.bytes_so_far.saturating_sub(previous.bytes_so_far),
                total_written: record.bytes_so_far,
                total_expected: record.total_size,
            });
        }

        if previous.status.as_ref() != Some(&record.status) {
            let event = match &record.status {
                ServiceStatus::Pending => BackendEvent::Queued { task },
                ServiceStatus::Running => BackendEvent::Resumed {
                    task,
                    offset: record.bytes_so_far,
                    expected_total: record.total_size,
                },
                ServiceStatus::Paused { reason } => BackendEvent::Paused {
                    task,
                    reason: PauseReason::from_reason_code(*reason),
                },
                ServiceStatus::Successful {
                    local_path,
                    media_type,
                } => BackendEvent::Finished {
                    task,
                    location: local_path.clone(),
                    http_status: None,
                    mime_type: media_type.clone(),
                },
                ServiceStatus::Failed { reason } => BackendEvent::Failed {
                    task,
                    cause: FailureCause::from_reason_code(*reason),
                },
            };
            self.sink.emit(event);
        }

        if record.status.is_terminal() {
            self.watched.remove(&task);
        } else if let Some(mut entry) = self.watched.get_mut(&task) {
            entry.bytes_so_far = record.bytes_so_far;
            entry.status = Some(record.status);
        }
    }
}

#[async_trait]
impl NativeBackend for PollingBackend {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn create_task(&self, request: &TaskRequest) -> Result<TaskHandle, BackendError> {
        let service_request = ServiceRequest {
            url: request.url.clone(),
            headers: request.headers.clone(),
            destination: request.destination.clone(),
            allowed_over_metered: request.allows_cellular_access
                && self.shared.config.allows_cellular_access,
            notification_visibility: self.shared.config.notification_visibility,
            visible_in_downloads_ui: self.shared.config.visible_in_downloads_ui,
        };
        let id = self.shared.service.enqueue(&service_request).await?;
        debug!(id, "enqueued with download service");
        Ok(TaskHandle::new(id))
    }

    #[instrument(skip(self))]
    async fn resume(&self, task: TaskHandle) -> Result<(), BackendError> {
        self.shared.watched.entry(task).or_default();
        self.ensure_watcher();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel(&self, task: TaskHandle) -> Result<(), BackendError> {
        self.shared.watched.remove(&task);
        self.shared.service.remove(task.id()).await
    }

    async fn owned_tasks(&self) -> Result<Vec<OwnedTask>, BackendError> {
        let rows = self.shared.service.list().await?;
        let mut owned = Vec::with_capacity(rows.len());
        let mut watching = false;

        for row in rows {
            let handle = TaskHandle::new(row.id);
            if !row.status.is_terminal() {
                self.shared.watched.insert(
                    handle,
                    Observed {
                        bytes_so_far: row.bytes_so_far,
                        status: Some(row.status.clone()),
                    },
                );
                watching = true;
            }
            owned.push(OwnedTask {
                handle,
                state: row.status.native_state(),
                url: row.url,
                headers: row.headers,
                bytes_written: row.bytes_so_far,
                bytes_expected: row.total_size,
            });
        }

        debug!(count = owned.len(), "download service owns tasks");
        if watching {
            self.ensure_watcher();
        }
        Ok(owned)
    }
}
