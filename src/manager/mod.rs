//! Download queue orchestration.
//!
//! [`DownloadManager`] owns the queue of started files, hands the head file to
//! the [`NativeBackend`], and reconciles backend events into file state. It is
//! built once per process with [`DownloadManagerBuilder`] and shared as
//! `Arc<DownloadManager>`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use download_manager_core::backend::{HttpBackend, event_channel};
//! use download_manager_core::config::ManagerConfig;
//! use download_manager_core::file::Headers;
//! use download_manager_core::manager::DownloadManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig {
//!     download_dir: Some("./downloads".into()),
//!     ..ManagerConfig::default()
//! };
//! let (sink, events) = event_channel();
//! let backend = HttpBackend::new(config.backend.clone(), "./downloads/.staging", sink)?;
//! let manager = DownloadManager::builder(Arc::new(backend))
//!     .config(config)
//!     .build(events)
//!     .await?;
//!
//! let file = manager.create_download_file("https://example.com/a.zip", Headers::new())?;
//! manager.start(&file, true).await?;
//! manager.wait_idle().await;
//! println!("{}: {}", file.name_file(), file.status());
//! # Ok(())
//! # }
//! ```

mod advance;
mod error;
mod reconcile;

pub use error::ManagerError;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::backend::{EventStream, NativeBackend};
use crate::config::ManagerConfig;
use crate::file::{DownloadFile, DownloadFileStatus, Headers, Trigger};
use crate::lifecycle::{AppLifecycle, SharedLifecycle};
use crate::queue::DownloadQueue;
use crate::storage::{FileStore, LocalFileStore};

/// Decides the final placement of a file.
pub type DestinationHook = Arc<dyn Fn(&DownloadFile) -> PathBuf + Send + Sync>;

/// Runs once after the backend delivered all deferred background events.
pub type CompletionHandler = Box<dyn FnOnce() + Send>;

/// Mime type recorded when nothing better is known.
const FALLBACK_MIME_TYPE: &str = "*/*";

fn guess_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

/// Builder for [`DownloadManager`].
pub struct DownloadManagerBuilder {
    backend: Arc<dyn NativeBackend>,
    file_store: Arc<dyn FileStore>,
    lifecycle: Arc<dyn AppLifecycle>,
    config: ManagerConfig,
    destination_hook: Option<DestinationHook>,
}

impl DownloadManagerBuilder {
    /// Filesystem collaborator; defaults to [`LocalFileStore`].
    #[must_use]
    pub fn file_store(mut self, file_store: Arc<dyn FileStore>) -> Self {
        self.file_store = file_store;
        self
    }

    /// Lifecycle probe; defaults to an always-foreground [`SharedLifecycle`].
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Arc<dyn AppLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn destination_path_for(mut self, hook: DestinationHook) -> Self {
        self.destination_hook = Some(hook);
        self
    }

    /// Validates the configuration, adopts tasks the backend already owns and
    /// starts consuming `events`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Config`] when the configuration is out of range.
    pub async fn build(self, events: EventStream) -> Result<Arc<DownloadManager>, ManagerError> {
        self.config.validate()?;

        let manager = Arc::new(DownloadManager {
            backend: self.backend,
            file_store: self.file_store,
            lifecycle: self.lifecycle,
            config: self.config,
            queue: DownloadQueue::new(),
            destination_hook: RwLock::new(self.destination_hook),
            completion_handler: Mutex::new(None),
            recovered: Mutex::new(Vec::new()),
            idle: Notify::new(),
        });

        manager.reattach().await;

        let weak = Arc::downgrade(&manager);
        tokio::spawn(async move {
            run_event_loop(weak, events).await;
        });

        Ok(manager)
    }
}

/// Applies events in delivery order until the manager or every sink is gone.
async fn run_event_loop(manager: Weak<DownloadManager>, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.on_event(event).await;
    }
    debug!("event loop stopped");
}

/// Orchestrates downloads over a [`NativeBackend`].
pub struct DownloadManager {
    backend: Arc<dyn NativeBackend>,
    file_store: Arc<dyn FileStore>,
    lifecycle: Arc<dyn AppLifecycle>,
    config: ManagerConfig,
    queue: DownloadQueue,
    destination_hook: RwLock<Option<DestinationHook>>,
    completion_handler: Mutex<Option<CompletionHandler>>,
    recovered: Mutex<Vec<Arc<DownloadFile>>>,
    idle: Notify,
}

impl DownloadManager {
    /// Starts building a manager over `backend`.
    #[must_use]
    pub fn builder(backend: Arc<dyn NativeBackend>) -> DownloadManagerBuilder {
        DownloadManagerBuilder {
            backend,
            file_store: Arc::new(LocalFileStore::new()),
            lifecycle: Arc::new(SharedLifecycle::default()),
            config: ManagerConfig::default(),
            destination_hook: None,
        }
    }

    /// Creates a file record. Nothing is queued until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidUrl`] when `url` is not an absolute URL.
    pub fn create_download_file(
        &self,
        url: &str,
        headers: Headers,
    ) -> Result<Arc<DownloadFile>, ManagerError> {
        Ok(Arc::new(DownloadFile::new(url, headers)?))
    }

    /// Starts downloading `file`.
    ///
    /// A live file with the same URL is superseded: it is canceled and removed
    /// and `file` takes its place at the end of the queue. Otherwise, if the
    /// destination already exists, `file` completes immediately without any
    /// backend call.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::AlreadyStarted`] when `file` is not in `None`.
    #[instrument(skip(self, file), fields(url = %file.url()))]
    pub async fn start(
        &self,
        file: &Arc<DownloadFile>,
        mobile_network_allowed: bool,
    ) -> Result<(), ManagerError> {
        let status = file.status();
        if status != DownloadFileStatus::None {
            return Err(ManagerError::AlreadyStarted {
                url: file.url().to_string(),
                status,
            });
        }
        file.set_mobile_network_allowed(mobile_network_allowed);

        let superseding = self.queue.find_by_url(file.url()).is_some();
        if !superseding
            && let Some(destination) = self.destination_for(file)
            && self.file_store.exists(&destination).await
        {
            file.set_destination_path(&destination);
            file.set_mime_type(Some(guess_mime_type(&destination)));
            file.transition(Trigger::Succeeded, None);
            info!(path = %destination.display(), "already downloaded");
            return Ok(());
        }

        if file.transition(Trigger::Accepted, None).is_none() {
            return Err(ManagerError::AlreadyStarted {
                url: file.url().to_string(),
                status: file.status(),
            });
        }

        for prior in self.queue.insert_superseding(Arc::clone(file)) {
            info!(task = ?prior.task(), "superseding earlier download of the same URL");
            self.cancel_file(&prior).await;
        }

        self.advance().await;
        Ok(())
    }

    /// Aborts `file`: it becomes `Canceled`, leaves the queue, and its backend
    /// task is cancelled on a best-effort basis.
    #[instrument(skip(self, file), fields(url = %file.url()))]
    pub async fn abort(&self, file: &Arc<DownloadFile>) {
        self.queue.remove(file);
        self.cancel_file(file).await;
        self.advance().await;
    }

    /// Snapshot of the queued files, in queue order.
    #[must_use]
    pub fn queue(&self) -> Vec<Arc<DownloadFile>> {
        self.queue.snapshot()
    }

    /// Files adopted at startup whose backend task had already finished.
    #[must_use]
    pub fn recovered(&self) -> Vec<Arc<DownloadFile>> {
        self.recovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Replaces the destination hook consulted for placement decisions.
    pub fn set_destination_path_for(&self, hook: DestinationHook) {
        *self
            .destination_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Registers `handler` to run once when the backend reports that all
    /// background events were delivered. Replaces any pending handler.
    pub fn set_background_completion_handler(&self, handler: impl FnOnce() + Send + 'static) {
        *self
            .completion_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(handler));
    }

    /// Resolves once the queue is empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.queue.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Intended final placement: the hook, else `download_dir/name_file`.
    fn destination_for(&self, file: &DownloadFile) -> Option<PathBuf> {
        let hook = self
            .destination_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match hook {
            Some(hook) => Some(hook(file)),
            None => self
                .config
                .download_dir
                .as_ref()
                .map(|dir| dir.join(file.name_file())),
        }
    }

    /// Moves `file` to `Canceled` and cancels its backend task.
    async fn cancel_file(&self, file: &Arc<DownloadFile>) {
        if file.transition(Trigger::Aborted, None).is_none() {
            debug!(status = %file.status(), "file already finished, nothing to cancel");
            return;
        }
        if let Some(task) = file.task()
            && let Err(e) = self.backend.cancel(task).await
        {
            warn!(task = %task, error = %e, "backend cancel failed");
        }
    }

    /// Adopts tasks the backend already owns.
    async fn reattach(&self) {
        let owned = match self.backend.owned_tasks().await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(error = %e, "could not enumerate backend tasks, starting empty");
                return;
            }
        };

        for task in owned {
            let file = Arc::new(DownloadFile::adopted(&task));
            info!(task = %task.handle, url = %file.url(), status = %file.status(), "adopted backend task");
            if file.status().is_terminal() {
                self.recovered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(file);
            } else {
                self.queue.push(file);
            }
        }
    }

    fn notify_if_idle(&self) {
        if self.queue.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("/tmp/a.pdf")), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("/tmp/noext")), "*/*");
    }
}
