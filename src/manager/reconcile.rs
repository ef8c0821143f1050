//! Backend event reconciliation.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use tracing::{debug, info, warn};

use super::{DownloadManager, guess_mime_type};
use crate::backend::BackendEvent;
use crate::file::{DownloadFile, DownloadFileStatus, FailureCause, Trigger};

impl DownloadManager {
    /// Applies one backend event.
    ///
    /// Events are matched to files by task handle against the current queue;
    /// an event for a task that is no longer queued is ignored.
    pub(super) async fn on_event(&self, event: BackendEvent) {
        let Some(task) = event.task() else {
            self.run_completion_handler();
            return;
        };
        let Some(file) = self.queue.find_by_task(task) else {
            debug!(task = %task, event = event.kind(), "event for unknown task ignored");
            return;
        };

        match event {
            BackendEvent::Resumed {
                offset,
                expected_total,
                ..
            } => {
                if file.transition(Trigger::Resumed, None).is_some() {
                    file.record_progress(offset, expected_total);
                }
            }
            BackendEvent::Progress {
                total_written,
                total_expected,
                ..
            } => {
                if file.transition(Trigger::Progressed, None).is_some() {
                    file.record_progress(total_written, total_expected);
                }
            }
            BackendEvent::Queued { .. } => {
                file.transition(Trigger::Queued, None);
            }
            BackendEvent::Paused { reason, .. } => {
                file.transition(Trigger::Paused, Some(reason.to_string()));
            }
            BackendEvent::Finished {
                location,
                http_status,
                mime_type,
                ..
            } => self.finish(&file, location, http_status, mime_type).await,
            BackendEvent::Failed { cause, .. } => fail(&file, &cause),
            BackendEvent::Vanished { .. } => {
                warn!(task = %task, url = %file.url(), "backend task vanished");
                file.transition(Trigger::Vanished, None);
            }
            BackendEvent::QueryFailed { message, .. } => {
                warn!(task = %task, error = %message, "backend status query failed");
            }
            BackendEvent::BackgroundEventsSettled => {}
        }

        match file.status() {
            status if status.is_terminal() => self.retire(&file).await,
            // A paused file no longer holds back the files behind it.
            DownloadFileStatus::Paused => self.advance().await,
            _ => {}
        }
    }

    async fn finish(
        &self,
        file: &Arc<DownloadFile>,
        location: PathBuf,
        http_status: Option<u16>,
        mime_type: Option<String>,
    ) {
        if let Some(status) = http_status
            && status >= 400
        {
            fail(file, &FailureCause::HttpStatus(status));
            return;
        }

        let final_path = match self.destination_for(file) {
            Some(destination) if destination != location => {
                if let Err(e) = self.file_store.relocate(&location, &destination).await {
                    warn!(
                        from = %location.display(),
                        to = %destination.display(),
                        error = %e,
                        "relocation failed"
                    );
                    file.transition(
                        Trigger::Failed,
                        Some(FailureCause::Relocation(e.to_string()).to_string()),
                    );
                    return;
                }
                destination
            }
            _ => location,
        };

        file.set_destination_path(&final_path);
        file.set_mime_type(Some(
            mime_type.unwrap_or_else(|| guess_mime_type(&final_path)),
        ));
        if file.transition(Trigger::Succeeded, None).is_some() {
            info!(url = %file.url(), path = %final_path.display(), "download completed");
        }
    }

    /// Removes a finished file and drives the next head.
    async fn retire(&self, file: &Arc<DownloadFile>) {
        if self.queue.remove(file) {
            debug!(url = %file.url(), status = %file.status(), "retired");
        }
        self.advance().await;
    }

    fn run_completion_handler(&self) {
        let handler = self
            .completion_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            debug!("running background completion handler");
            handler();
        }
    }
}

/// Records a transfer failure. The exception count only moves when the file
/// actually enters `Failed`.
fn fail(file: &DownloadFile, cause: &FailureCause) {
    if file.status().next(Trigger::Failed) == Some(DownloadFileStatus::Failed) {
        file.increment_request_exceptions();
    }
    if file
        .transition(Trigger::Failed, Some(cause.to_string()))
        .is_some()
    {
        warn!(url = %file.url(), cause = %cause, "download failed");
    }
}
