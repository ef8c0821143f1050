//! Shared test doubles for manager and backend integration tests.
//!
//! - [`MockBackend`] records every call and lets tests inject events
//! - [`MemoryFileStore`] simulates the filesystem collaborator
//! - [`eventually`] waits for asynchronous event processing

#![allow(dead_code)]

pub mod socket_guard;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use download_manager_core::backend::{OwnedTask, TaskRequest};
use download_manager_core::{
    BackendError, BackendEvent, DownloadManager, EventSink, FileStore, ManagerConfig,
    NativeBackend, TaskHandle, event_channel,
};
use tokio::sync::Notify;

/// Directory used as `download_dir` by [`harness`].
pub const DOWNLOAD_DIR: &str = "/downloads";

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(TaskRequest),
    Resume(TaskHandle),
    Cancel(TaskHandle),
    OwnedTasks,
}

/// Scriptable [`NativeBackend`].
pub struct MockBackend {
    sink: EventSink,
    next_id: AtomicU64,
    calls: Mutex<Vec<Call>>,
    fail_create: AtomicBool,
    fail_resume: AtomicBool,
    owned: Mutex<Option<Vec<OwnedTask>>>,
    create_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockBackend {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            next_id: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            owned: Mutex::new(Some(Vec::new())),
            create_gate: Mutex::new(None),
        }
    }

    /// Delivers `event` as if the native engine had reported it.
    pub fn emit(&self, event: BackendEvent) {
        self.sink.emit(event);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_resume(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::SeqCst);
    }

    /// Tasks reported by `owned_tasks`; `None` makes enumeration fail.
    pub fn set_owned(&self, owned: Option<Vec<OwnedTask>>) {
        *self.owned.lock().unwrap() = owned;
    }

    /// Makes `create_task` wait until the returned notify fires.
    pub fn gate_create(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than startup enumeration.
    pub fn transfer_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| *call != Call::OwnedTasks)
            .collect()
    }

    pub fn created(&self) -> Vec<TaskRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn resumed(&self) -> Vec<TaskHandle> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Resume(task) => Some(task),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<TaskHandle> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Cancel(task) => Some(task),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl NativeBackend for MockBackend {
    async fn create_task(&self, request: &TaskRequest) -> Result<TaskHandle, BackendError> {
        self.record(Call::Create(request.clone()));
        let gate = self.create_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackendError::service("task limit reached"));
        }
        Ok(TaskHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn resume(&self, task: TaskHandle) -> Result<(), BackendError> {
        self.record(Call::Resume(task));
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(BackendError::UnknownTask { task });
        }
        Ok(())
    }

    async fn cancel(&self, task: TaskHandle) -> Result<(), BackendError> {
        self.record(Call::Cancel(task));
        Ok(())
    }

    async fn owned_tasks(&self) -> Result<Vec<OwnedTask>, BackendError> {
        self.record(Call::OwnedTasks);
        self.owned
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BackendError::service("enumeration unavailable"))
    }
}

/// In-memory [`FileStore`].
#[derive(Default)]
pub struct MemoryFileStore {
    existing: Mutex<HashSet<PathBuf>>,
    relocations: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail_relocate: AtomicBool,
}

impl MemoryFileStore {
    pub fn add(&self, path: impl Into<PathBuf>) {
        self.existing.lock().unwrap().insert(path.into());
    }

    pub fn fail_relocate(&self, fail: bool) {
        self.fail_relocate.store(fail, Ordering::SeqCst);
    }

    pub fn relocations(&self) -> Vec<(PathBuf, PathBuf)> {
        self.relocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn exists(&self, path: &Path) -> bool {
        self.existing.lock().unwrap().contains(path)
    }

    async fn relocate(&self, source: &Path, destination: &Path) -> io::Result<()> {
        if self.fail_relocate.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"));
        }
        let mut existing = self.existing.lock().unwrap();
        existing.remove(source);
        existing.insert(destination.to_path_buf());
        self.relocations
            .lock()
            .unwrap()
            .push((source.to_path_buf(), destination.to_path_buf()));
        Ok(())
    }
}

/// A manager over a [`MockBackend`] and a [`MemoryFileStore`].
pub struct Harness {
    pub manager: Arc<DownloadManager>,
    pub backend: Arc<MockBackend>,
    pub store: Arc<MemoryFileStore>,
}

pub fn default_config() -> ManagerConfig {
    ManagerConfig {
        download_dir: Some(PathBuf::from(DOWNLOAD_DIR)),
        ..ManagerConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(default_config(), |_, _| {}).await
}

/// Builds a harness; `prepare` runs before the manager is built, so it can
/// seed owned tasks or existing files.
pub async fn harness_with(
    config: ManagerConfig,
    prepare: impl FnOnce(&MockBackend, &MemoryFileStore),
) -> Harness {
    let (sink, events) = event_channel();
    let backend = Arc::new(MockBackend::new(sink));
    let store = Arc::new(MemoryFileStore::default());
    prepare(&backend, &store);

    let manager = DownloadManager::builder(Arc::clone(&backend) as Arc<dyn NativeBackend>)
        .file_store(Arc::clone(&store) as Arc<dyn FileStore>)
        .config(config)
        .build(events)
        .await
        .expect("manager should build");

    Harness {
        manager,
        backend,
        store,
    }
}

/// Waits up to five seconds for `condition`.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
