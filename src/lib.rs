//! Download Manager Core Library
//!
//! This library queues remote-file downloads on a native transfer engine and
//! exposes each download as an observable record.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`file`] - Download file records, status machine and failure causes
//! - [`queue`] - The in-memory queue of started files
//! - [`manager`] - Orchestration: start, abort, queue advance, event reconciliation
//! - [`backend`] - The native backend interface plus HTTP and polling engines
//! - [`storage`] - Filesystem collaborator used for placement
//! - [`lifecycle`] - Foreground/background probe
//! - [`config`] - Manager and backend configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod file;
pub mod lifecycle;
pub mod manager;
pub mod queue;
pub mod storage;

// Re-export commonly used types
pub use backend::{
    BackendError, BackendEvent, EventSink, EventStream, HttpBackend, NativeBackend,
    PollingBackend, TaskHandle, event_channel,
};
pub use config::{BackendConfig, ConfigError, ManagerConfig, NotificationVisibility};
pub use file::{DownloadFile, DownloadFileStatus, FailureCause, FileChange, FileField, Headers};
pub use lifecycle::{AppLifecycle, LifecycleState, SharedLifecycle};
pub use manager::{DownloadManager, DownloadManagerBuilder, ManagerError};
pub use queue::DownloadQueue;
pub use storage::{FileStore, LocalFileStore};
