//! Continuous-session backend built on `reqwest` streaming.
//!
//! Bodies are streamed into `{staging_dir}/{id}.part`; the manager relocates
//! the staged file once `Finished` arrives. Simultaneous transfers to one host
//! are bounded by `max_connections_per_host`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::PARTIAL_SUFFIX;
use super::{
    BackendError, BackendEvent, EventSink, NativeBackend, NativeTaskState, OwnedTask, TaskHandle,
    TaskRequest,
};
use crate::config::BackendConfig;
use crate::file::FailureCause;

/// Default User-Agent for download requests (identifies the tool).
fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("download-manager/{version}")
}

#[derive(Debug)]
struct TaskEntry {
    request: TaskRequest,
    token: CancellationToken,
    started: bool,
    bytes_written: u64,
    bytes_expected: Option<u64>,
}

#[derive(Debug)]
struct Shared {
    client: Client,
    config: BackendConfig,
    staging_dir: PathBuf,
    sink: EventSink,
    tasks: DashMap<TaskHandle, TaskEntry>,
    host_permits: DashMap<String, Arc<Semaphore>>,
    next_id: AtomicU64,
}

/// Streaming HTTP engine.
///
/// Cheap to clone; clones share the task table and connection limits.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    shared: Arc<Shared>,
}

impl HttpBackend {
    /// Creates a backend staging bodies under `staging_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory cannot be created or the
    /// HTTP client cannot be built.
    pub fn new(
        config: BackendConfig,
        staging_dir: impl Into<PathBuf>,
        sink: EventSink,
    ) -> Result<Self, BackendError> {
        let staging_dir = staging_dir.into();
        std::fs::create_dir_all(&staging_dir)
            .map_err(|e| BackendError::io(staging_dir.clone(), e))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .gzip(true)
            .user_agent(default_user_agent())
            .build()
            .map_err(|source| BackendError::Http { source })?;

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                config,
                staging_dir,
                sink,
                tasks: DashMap::new(),
                host_permits: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Directory holding in-flight and finished bodies.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.shared.staging_dir
    }
}

impl Shared {
    fn staging_path(&self, task: TaskHandle) -> PathBuf {
        self.staging_dir
            .join(format!("{}.{PARTIAL_SUFFIX}", task.id()))
    }

    fn permits_for(&self, url: &str) -> Arc<Semaphore> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| url.to_string());
        self.host_permits
            .entry(host)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_connections_per_host)))
            .clone()
    }

    fn record_progress(&self, task: TaskHandle, written: u64, expected: Option<u64>) {
        if let Some(mut entry) = self.tasks.get_mut(&task) {
            entry.bytes_written = written;
            entry.bytes_expected = expected;
        }
    }
}

#[async_trait]
impl NativeBackend for HttpBackend {
    #[instrument(skip(self, request), fields(url = %request.url, session = %request.session))]
    async fn create_task(&self, request: &TaskRequest) -> Result<TaskHandle, BackendError> {
        if Url::parse(&request.url).is_err() {
            return Err(BackendError::invalid_url(&request.url));
        }
        let handle = TaskHandle::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        self.shared.tasks.insert(
            handle,
            TaskEntry {
                request: request.clone(),
                token: CancellationToken::new(),
                started: false,
                bytes_written: 0,
                bytes_expected: None,
            },
        );
        debug!(task = %handle, "task created");
        Ok(handle)
    }

    #[instrument(skip(self))]
    async fn resume(&self, task: TaskHandle) -> Result<(), BackendError> {
        let (request, token) = {
            let mut entry = self
                .shared
                .tasks
                .get_mut(&task)
                .ok_or(BackendError::UnknownTask { task })?;
            if entry.started {
                return Ok(());
            }
            entry.started = true;
            (entry.request.clone(), entry.token.clone())
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            run_task(shared, task, request, token).await;
        });
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel(&self, task: TaskHandle) -> Result<(), BackendError> {
        if let Some((_, entry)) = self.shared.tasks.remove(&task) {
            entry.token.cancel();
            debug!(task = %task, started = entry.started, "task cancelled");
        }
        Ok(())
    }

    async fn owned_tasks(&self) -> Result<Vec<OwnedTask>, BackendError> {
        let mut owned: Vec<OwnedTask> = self
            .shared
            .tasks
            .iter()
            .map(|entry| OwnedTask {
                handle: *entry.key(),
                state: if entry.started {
                    NativeTaskState::Running
                } else {
                    NativeTaskState::Suspended
                },
                url: entry.request.url.clone(),
                headers: entry.request.headers.clone(),
                bytes_written: entry.bytes_written,
                bytes_expected: entry.bytes_expected,
            })
            .collect();
        owned.sort_by_key(|task| task.handle);
        Ok(owned)
    }
}

async fn run_task(
    shared: Arc<Shared>,
    task: TaskHandle,
    request: TaskRequest,
    token: CancellationToken,
) {
    let permits = shared.permits_for(&request.url);
    let permit = match Arc::clone(&permits).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            shared.sink.emit(BackendEvent::Queued { task });
            tokio::select! {
                () = token.cancelled() => return,
                acquired = permits.acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            }
        }
    };

    let path = shared.staging_path(task);
    let outcome = tokio::select! {
        () = token.cancelled() => None,
        result = transfer(&shared, task, &request, &path) => Some(result),
    };
    drop(permit);
    shared.tasks.remove(&task);

    match outcome {
        None => {
            debug!(task = %task, "transfer cancelled, discarding partial body");
            let _ = tokio::fs::remove_file(&path).await;
        }
        Some(Ok(event)) => shared.sink.emit(event),
        Some(Err(message)) => {
            warn!(task = %task, url = %request.url, error = %message, "transfer failed");
            let _ = tokio::fs::remove_file(&path).await;
            shared.sink.emit(BackendEvent::Failed {
                task,
                cause: FailureCause::Transfer(message),
            });
        }
    }
}

/// Runs one GET and streams its body to `path`.
///
/// Error statuses finish without a body so the manager can fail the file with
/// the HTTP code.
async fn transfer(
    shared: &Shared,
    task: TaskHandle,
    request: &TaskRequest,
    path: &Path,
) -> Result<BackendEvent, String> {
    let mut builder = shared.client.get(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            format!("timeout downloading {}", request.url)
        } else {
            format!("network error downloading {}: {e}", request.url)
        }
    })?;

    let status = response.status().as_u16();
    let expected = response.content_length();
    let mime_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    shared.sink.emit(BackendEvent::Resumed {
        task,
        offset: 0,
        expected_total: expected,
    });

    if status >= 400 {
        debug!(task = %task, status, "server returned error status");
        return Ok(BackendEvent::Finished {
            task,
            location: path.to_path_buf(),
            http_status: Some(status),
            mime_type,
        });
    }

    let file = File::create(path)
        .await
        .map_err(|e| format!("IO error writing to {}: {e}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut total_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| format!("network error downloading {}: {e}", request.url))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| format!("IO error writing to {}: {e}", path.display()))?;

        let bytes_written = chunk.len() as u64;
        total_written += bytes_written;
        shared.record_progress(task, total_written, expected);
        shared.sink.emit(BackendEvent::Progress {
            task,
            bytes_written,
            total_written,
            total_expected: expected,
        });
    }

    // Ensure all data is flushed to disk
    writer
        .flush()
        .await
        .map_err(|e| format!("IO error writing to {}: {e}", path.display()))?;

    info!(task = %task, bytes = total_written, status, "transfer complete");
    Ok(BackendEvent::Finished {
        task,
        location: path.to_path_buf(),
        http_status: Some(status),
        mime_type,
    })
}
