//! Queue advance: hands the head file to the backend.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::DownloadManager;
use crate::backend::{SessionKind, TaskRequest};
use crate::file::{DownloadFile, FailureCause, Trigger};
use crate::lifecycle::LifecycleState;

impl DownloadManager {
    /// Drives the queue head, stepping over paused files. A head that cannot
    /// be handed off fails, leaves the queue, and the next head is tried.
    pub(super) async fn advance(&self) {
        while let Some(file) = self.queue.claim_head() {
            match self.hand_off(&file).await {
                Ok(()) => {}
                Err(cause) if !file.status().is_terminal() => {
                    warn!(url = %file.url(), error = %cause, "hand-off failed");
                    if let Some(task) = file.task()
                        && let Err(e) = self.backend.cancel(task).await
                    {
                        debug!(task = %task, error = %e, "cancel after failed hand-off");
                    }
                    file.increment_request_exceptions();
                    file.transition(Trigger::Failed, Some(cause.to_string()));
                    self.queue.remove(&file);
                }
                Err(_) => {
                    self.queue.remove(&file);
                }
            }
        }
        self.notify_if_idle();
    }

    /// Session for a hand-off made now.
    pub(super) fn select_session(&self) -> SessionKind {
        if self.config.avoid_discretionary_in_background
            && self.lifecycle.state() == LifecycleState::Background
        {
            SessionKind::Foreground
        } else {
            SessionKind::Background
        }
    }

    async fn hand_off(&self, file: &Arc<DownloadFile>) -> Result<(), FailureCause> {
        let request = TaskRequest {
            url: file.url().to_string(),
            headers: file.headers().clone(),
            allows_cellular_access: file.mobile_network_allowed()
                && self.config.backend.allows_cellular_access,
            destination: self.destination_for(file),
            session: self.select_session(),
        };

        let task = self
            .backend
            .create_task(&request)
            .await
            .map_err(|e| FailureCause::TaskCreation(e.to_string()))?;
        file.set_task(task);

        if file.transition(Trigger::HandedOff, None).is_none() {
            debug!(task = %task, status = %file.status(), "file left the queue during hand-off");
            if let Err(e) = self.backend.cancel(task).await {
                debug!(task = %task, error = %e, "cancel of orphaned task failed");
            }
            return Ok(());
        }

        self.backend
            .resume(task)
            .await
            .map_err(|e| FailureCause::TaskCreation(e.to_string()))?;
        info!(task = %task, session = %request.session, url = %file.url(), "handed off");
        Ok(())
    }
}
