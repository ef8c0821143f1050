//! Download file records.
//!
//! A [`DownloadFile`] is the tracked representation of one logical download.
//! Its identity (`url`, `headers`, `name_file`) is fixed at construction; the
//! remaining fields are mutated by the manager only, and every effective
//! mutation is published to subscribers as a [`FileChange`].
//!
//! # Example
//!
//! ```
//! use download_manager_core::file::{DownloadFile, DownloadFileStatus, Headers};
//!
//! let file = DownloadFile::new("https://example.com/my report.pdf", Headers::new()).unwrap();
//! assert_eq!(file.url(), "https://example.com/my%20report.pdf");
//! assert_eq!(file.name_file(), "my report.pdf");
//! assert_eq!(file.status(), DownloadFileStatus::None);
//! ```

mod cause;
mod status;

pub use cause::{FailureCause, PauseReason};
pub use status::{DownloadFileStatus, Trigger};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use url::Url;

use crate::backend::{NativeTaskState, OwnedTask, TaskHandle};

/// Capacity of each file's change channel. Slow subscribers observe `Lagged`.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Request headers, ordered by name.
pub type Headers = BTreeMap<String, String>;

/// Error returned when a download URL cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid download URL '{url}': {reason}")]
pub struct InvalidUrl {
    /// The rejected input.
    pub url: String,
    /// Parser diagnostic.
    pub reason: String,
}

/// Normalizes a download URL: trims it, percent-encodes spaces and requires
/// an absolute URL with a host.
///
/// # Errors
///
/// Returns [`InvalidUrl`] when the input does not parse as an absolute URL.
pub fn normalize_url(raw: &str) -> Result<String, InvalidUrl> {
    let encoded = raw.trim().replace(' ', "%20");
    let parsed = Url::parse(&encoded).map_err(|e| InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
        return Err(InvalidUrl {
            url: raw.to_string(),
            reason: "URL has no host".to_string(),
        });
    }
    Ok(parsed.to_string())
}

/// Derives the display name: the last non-empty path segment, percent-decoded.
fn derive_name_file(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.rsplit('/').next().unwrap_or(url).to_string();
    };
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| {
            urlencoding::decode(s)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| s.to_string())
        });
    segment.unwrap_or_else(|| parsed.host_str().unwrap_or_default().to_string())
}

/// Names a mutable field of a [`DownloadFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileField {
    Task,
    MimeType,
    DestinationPath,
    Status,
    StatusDetails,
    BytesWritten,
    BytesExpected,
    RequestExceptionCount,
}

impl FileField {
    /// Returns the field name as used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::MimeType => "mime_type",
            Self::DestinationPath => "destination_path",
            Self::Status => "status",
            Self::StatusDetails => "status_details",
            Self::BytesWritten => "bytes_written",
            Self::BytesExpected => "bytes_expected",
            Self::RequestExceptionCount => "request_exception_count",
        }
    }
}

impl fmt::Display for FileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single effective mutation of a [`DownloadFile`], carrying the new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Task(TaskHandle),
    MimeType(Option<String>),
    DestinationPath(Option<PathBuf>),
    Status(DownloadFileStatus),
    StatusDetails(Option<String>),
    BytesWritten(u64),
    BytesExpected(Option<u64>),
    RequestExceptionCount(u32),
}

impl FileChange {
    /// Returns which field changed.
    #[must_use]
    pub fn field(&self) -> FileField {
        match self {
            Self::Task(_) => FileField::Task,
            Self::MimeType(_) => FileField::MimeType,
            Self::DestinationPath(_) => FileField::DestinationPath,
            Self::Status(_) => FileField::Status,
            Self::StatusDetails(_) => FileField::StatusDetails,
            Self::BytesWritten(_) => FileField::BytesWritten,
            Self::BytesExpected(_) => FileField::BytesExpected,
            Self::RequestExceptionCount(_) => FileField::RequestExceptionCount,
        }
    }
}

/// Point-in-time copy of a file's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSnapshot {
    pub url: String,
    pub name_file: String,
    pub task: Option<TaskHandle>,
    pub mime_type: Option<String>,
    pub destination_path: Option<PathBuf>,
    pub status: DownloadFileStatus,
    pub status_details: Option<String>,
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
    pub request_exception_count: u32,
}

#[derive(Debug, Default)]
struct FileState {
    task: Option<TaskHandle>,
    mime_type: Option<String>,
    destination_path: Option<PathBuf>,
    status: DownloadFileStatus,
    status_details: Option<String>,
    bytes_written: u64,
    bytes_expected: Option<u64>,
    request_exception_count: u32,
}

/// One logical download.
///
/// Shared as `Arc<DownloadFile>` between the caller and the manager. The
/// caller may keep its handle after the file left the queue; the manager no
/// longer mutates it then.
pub struct DownloadFile {
    url: String,
    headers: Headers,
    name_file: String,
    state: Mutex<FileState>,
    changes: broadcast::Sender<FileChange>,
    mobile_network_allowed: AtomicBool,
    claimed: AtomicBool,
}

impl DownloadFile {
    /// Creates a file for `url` with the request `headers`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidUrl`] when the URL cannot be normalized.
    pub fn new(url: &str, headers: Headers) -> Result<Self, InvalidUrl> {
        let url = normalize_url(url)?;
        Ok(Self::with_state(url, headers, FileState::default()))
    }

    /// Rebuilds a file for a task the backend kept alive across restarts.
    pub(crate) fn adopted(task: &OwnedTask) -> Self {
        let url = normalize_url(&task.url).unwrap_or_else(|_| task.url.clone());
        let status = match task.state {
            NativeTaskState::Pending => DownloadFileStatus::Pending,
            NativeTaskState::Running => DownloadFileStatus::Running,
            NativeTaskState::Suspended => DownloadFileStatus::Paused,
            NativeTaskState::Canceling => DownloadFileStatus::Canceling,
            NativeTaskState::Completed => DownloadFileStatus::Completed,
            NativeTaskState::Failed => DownloadFileStatus::Failed,
        };
        let state = FileState {
            task: Some(task.handle),
            status,
            bytes_written: task.bytes_written,
            bytes_expected: task.bytes_expected.map(|e| e.max(task.bytes_written)),
            ..FileState::default()
        };
        let file = Self::with_state(url, task.headers.clone(), state);
        file.claimed.store(true, Ordering::SeqCst);
        file
    }

    fn with_state(url: String, headers: Headers, state: FileState) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let name_file = derive_name_file(&url);
        Self {
            url,
            headers,
            name_file,
            state: Mutex::new(state),
            changes,
            mobile_network_allowed: AtomicBool::new(true),
            claimed: AtomicBool::new(false),
        }
    }

    /// The normalized URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Display name derived from the last URL path segment.
    #[must_use]
    pub fn name_file(&self) -> &str {
        &self.name_file
    }

    /// Backend task handle, once a task exists.
    #[must_use]
    pub fn task(&self) -> Option<TaskHandle> {
        self.lock().task
    }

    #[must_use]
    pub fn mime_type(&self) -> Option<String> {
        self.lock().mime_type.clone()
    }

    #[must_use]
    pub fn destination_path(&self) -> Option<PathBuf> {
        self.lock().destination_path.clone()
    }

    #[must_use]
    pub fn status(&self) -> DownloadFileStatus {
        self.lock().status
    }

    #[must_use]
    pub fn status_details(&self) -> Option<String> {
        self.lock().status_details.clone()
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes_written
    }

    /// Expected total size; `None` until the backend learns the content length.
    #[must_use]
    pub fn bytes_expected(&self) -> Option<u64> {
        self.lock().bytes_expected
    }

    /// Number of transfer failures observed for this file.
    #[must_use]
    pub fn request_exception_count(&self) -> u32 {
        self.lock().request_exception_count
    }

    /// Whether the transfer may use a metered (mobile) network.
    #[must_use]
    pub fn mobile_network_allowed(&self) -> bool {
        self.mobile_network_allowed.load(Ordering::SeqCst)
    }

    /// Subscribes to field changes made after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FileChange> {
        self.changes.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> FileSnapshot {
        let state = self.lock();
        FileSnapshot {
            url: self.url.clone(),
            name_file: self.name_file.clone(),
            task: state.task,
            mime_type: state.mime_type.clone(),
            destination_path: state.destination_path.clone(),
            status: state.status,
            status_details: state.status_details.clone(),
            bytes_written: state.bytes_written,
            bytes_expected: state.bytes_expected,
            request_exception_count: state.request_exception_count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Sent while the state lock is held so subscribers observe mutation order.
    fn publish(&self, change: FileChange) {
        // No receivers is not an error.
        let _ = self.changes.send(change);
    }

    /// Applies `trigger` through the state machine.
    ///
    /// `details` is stored when the new state records details (`Paused`,
    /// `Failed`); it is cleared when the new state is `Pending`, `Running` or
    /// `Completed`. Returns the new status, or `None` if the transition was
    /// rejected and nothing changed.
    pub(crate) fn transition(
        &self,
        trigger: Trigger,
        details: Option<String>,
    ) -> Option<DownloadFileStatus> {
        let mut state = self.lock();
        let next = state.status.next(trigger)?;

        let new_details = if next.records_details() {
            details
        } else if next.clears_details() {
            None
        } else {
            state.status_details.clone()
        };
        if state.status_details != new_details {
            state.status_details.clone_from(&new_details);
            self.publish(FileChange::StatusDetails(new_details));
        }
        if state.status != next {
            state.status = next;
            self.publish(FileChange::Status(next));
        }
        Some(next)
    }

    /// Records backend-reported progress.
    ///
    /// Counters only grow; a report that does not increase a counter is a
    /// no-op for that counter. A known `bytes_expected` never stays below
    /// `bytes_written`, whichever of the two the report changes.
    pub(crate) fn record_progress(&self, bytes_written: u64, bytes_expected: Option<u64>) {
        let mut state = self.lock();

        let written = state.bytes_written.max(bytes_written);
        let expected = match (state.bytes_expected, bytes_expected) {
            (Some(current), Some(reported)) => Some(current.max(reported)),
            (current, reported) => current.or(reported),
        }
        .map(|expected| expected.max(written));

        if expected != state.bytes_expected {
            state.bytes_expected = expected;
            self.publish(FileChange::BytesExpected(expected));
        }
        if written != state.bytes_written {
            state.bytes_written = written;
            self.publish(FileChange::BytesWritten(written));
        }
    }

    pub(crate) fn set_task(&self, task: TaskHandle) {
        let mut state = self.lock();
        if state.task != Some(task) {
            state.task = Some(task);
            self.publish(FileChange::Task(task));
        }
    }

    pub(crate) fn set_mime_type(&self, mime_type: Option<String>) {
        let mut state = self.lock();
        if state.mime_type != mime_type {
            state.mime_type.clone_from(&mime_type);
            self.publish(FileChange::MimeType(mime_type));
        }
    }

    pub(crate) fn set_destination_path(&self, path: &Path) {
        let mut state = self.lock();
        if state.destination_path.as_deref() != Some(path) {
            state.destination_path = Some(path.to_path_buf());
            self.publish(FileChange::DestinationPath(Some(path.to_path_buf())));
        }
    }

    pub(crate) fn increment_request_exceptions(&self) {
        let mut state = self.lock();
        state.request_exception_count = state.request_exception_count.saturating_add(1);
        self.publish(FileChange::RequestExceptionCount(
            state.request_exception_count,
        ));
    }

    pub(crate) fn set_mobile_network_allowed(&self, allowed: bool) {
        self.mobile_network_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Marks the file as handed to the backend. Returns false if it already was.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl fmt::Debug for DownloadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DownloadFile")
            .field("url", &self.url)
            .field("task", &state.task)
            .field("status", &state.status)
            .field("bytes_written", &state.bytes_written)
            .field("bytes_expected", &state.bytes_expected)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DownloadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadFile {{ url: {}, status: {} }}",
            self.url,
            self.status()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn drain(rx: &mut broadcast::Receiver<FileChange>) -> Vec<FileChange> {
        let mut out = Vec::new();
        while let Ok(change) = rx.try_recv() {
            out.push(change);
        }
        out
    }

    fn started_file() -> DownloadFile {
        let file = DownloadFile::new("https://example.com/a.zip", Headers::new()).unwrap();
        file.transition(Trigger::Accepted, None).unwrap();
        file
    }

    #[test]
    fn test_new_encodes_whitespace_and_derives_name() {
        let file = DownloadFile::new(
            " http://x/files/my file.zip ",
            Headers::from([("Auth".to_string(), "t".to_string())]),
        )
        .unwrap();
        assert_eq!(file.url(), "http://x/files/my%20file.zip");
        assert_eq!(file.name_file(), "my file.zip");
        assert_eq!(file.headers().get("Auth").map(String::as_str), Some("t"));
        assert_eq!(file.status(), DownloadFileStatus::None);
        assert_eq!(file.bytes_expected(), None);
    }

    #[test]
    fn test_name_falls_back_to_host() {
        let file = DownloadFile::new("https://example.com/", Headers::new()).unwrap();
        assert_eq!(file.name_file(), "example.com");
    }

    #[test]
    fn test_new_rejects_relative_url() {
        let err = DownloadFile::new("files/a.zip", Headers::new()).unwrap_err();
        assert!(err.to_string().contains("files/a.zip"));
    }

    #[test]
    fn test_transition_publishes_status_change() {
        let file = DownloadFile::new("https://example.com/a.zip", Headers::new()).unwrap();
        let mut rx = file.subscribe();

        assert_eq!(
            file.transition(Trigger::Accepted, None),
            Some(DownloadFileStatus::Initialized)
        );
        assert_eq!(
            drain(&mut rx),
            vec![FileChange::Status(DownloadFileStatus::Initialized)]
        );
    }

    #[test]
    fn test_redundant_transition_is_silent() {
        let file = started_file();
        file.transition(Trigger::Resumed, None).unwrap();
        let mut rx = file.subscribe();

        assert_eq!(
            file.transition(Trigger::Progressed, None),
            Some(DownloadFileStatus::Running)
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_rejected_transition_changes_nothing() {
        let file = started_file();
        file.transition(Trigger::Aborted, None).unwrap();
        let mut rx = file.subscribe();

        assert_eq!(file.transition(Trigger::Resumed, None), None);
        assert_eq!(file.status(), DownloadFileStatus::Canceled);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_failure_records_details_then_status() {
        let file = started_file();
        let mut rx = file.subscribe();

        file.transition(Trigger::Failed, Some("timeout".into()));
        assert_eq!(file.status_details().as_deref(), Some("timeout"));
        let changes = drain(&mut rx);
        assert_eq!(
            changes.iter().map(FileChange::field).collect::<Vec<_>>(),
            vec![FileField::StatusDetails, FileField::Status]
        );
    }

    #[test]
    fn test_running_clears_pause_details() {
        let file = started_file();
        file.transition(Trigger::HandedOff, None).unwrap();
        file.transition(Trigger::Paused, Some(PauseReason::WaitingForNetwork.to_string()));
        assert_eq!(
            file.status_details().as_deref(),
            Some("Paused.WaitingForNetwork")
        );

        file.transition(Trigger::Resumed, None);
        assert_eq!(file.status(), DownloadFileStatus::Running);
        assert_eq!(file.status_details(), None);
    }

    #[test]
    fn test_progress_only_notifies_on_increase() {
        let file = started_file();
        let mut rx = file.subscribe();

        file.record_progress(100, Some(1000));
        assert_eq!(
            drain(&mut rx),
            vec![
                FileChange::BytesExpected(Some(1000)),
                FileChange::BytesWritten(100)
            ]
        );

        file.record_progress(100, Some(1000));
        file.record_progress(50, None);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(file.bytes_written(), 100);

        file.record_progress(101, Some(1000));
        assert_eq!(drain(&mut rx), vec![FileChange::BytesWritten(101)]);
    }

    #[test]
    fn test_progress_keeps_written_within_expected() {
        let file = started_file();
        file.record_progress(10, Some(20));
        file.record_progress(30, None);
        assert_eq!(file.bytes_written(), 30);
        assert_eq!(file.bytes_expected(), Some(30));
    }

    #[test]
    fn test_late_expected_total_below_written_is_raised() {
        let file = started_file();
        file.record_progress(30, None);
        let mut rx = file.subscribe();

        file.record_progress(30, Some(20));

        assert_eq!(file.bytes_written(), 30);
        assert_eq!(file.bytes_expected(), Some(30));
        assert_eq!(
            drain(&mut rx),
            vec![FileChange::BytesExpected(Some(30))]
        );
    }

    #[test]
    fn test_setters_suppress_redundant_writes() {
        let file = started_file();
        let mut rx = file.subscribe();

        file.set_task(TaskHandle::new(7));
        file.set_task(TaskHandle::new(7));
        file.set_mime_type(Some("application/zip".into()));
        file.set_mime_type(Some("application/zip".into()));
        file.set_destination_path(Path::new("/tmp/a.zip"));
        file.set_destination_path(Path::new("/tmp/a.zip"));

        let fields: Vec<_> = drain(&mut rx).iter().map(FileChange::field).collect();
        assert_eq!(
            fields,
            vec![FileField::Task, FileField::MimeType, FileField::DestinationPath]
        );
    }

    #[test]
    fn test_claim_is_single_shot() {
        let file = started_file();
        assert!(file.try_claim());
        assert!(!file.try_claim());
    }

    #[test]
    fn test_adopted_infers_status() {
        let owned = OwnedTask {
            handle: TaskHandle::new(3),
            state: NativeTaskState::Suspended,
            url: "https://example.com/big.iso".into(),
            headers: Headers::new(),
            bytes_written: 5,
            bytes_expected: Some(10),
        };
        let file = DownloadFile::adopted(&owned);
        assert_eq!(file.status(), DownloadFileStatus::Paused);
        assert_eq!(file.task(), Some(TaskHandle::new(3)));
        assert_eq!(file.bytes_written(), 5);
        assert!(!file.try_claim());
    }
}
