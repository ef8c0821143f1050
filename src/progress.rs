//! Progress UI (spinner) for download runs.

use std::sync::Arc;
use std::time::Duration;

use download_manager_core::{DownloadFileStatus, DownloadManager};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Spawns the spinner when requested. Cancel `stop` and await the handle to
/// clear it.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    manager: Arc<DownloadManager>,
    total: usize,
    stop: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if !use_spinner {
        return None;
    }
    Some(tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        loop {
            spinner.set_message(status_line(&manager, total));
            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(Duration::from_millis(120)) => {}
            }
        }

        spinner.finish_and_clear();
    }))
}

fn status_line(manager: &DownloadManager, total: usize) -> String {
    let queued = manager.queue();
    let done = total.saturating_sub(queued.len());
    let Some(head) = queued.first() else {
        return format!("[{done}/{total}] Finishing...");
    };

    let host = Url::parse(head.url())
        .ok()
        .and_then(|url| url.host_str().map(std::string::ToString::to_string))
        .unwrap_or_else(|| "queue".to_string());
    let current = (done + 1).min(total);

    match (head.status(), head.bytes_expected()) {
        (DownloadFileStatus::Running, Some(expected)) if expected > 0 => {
            let percent = head.bytes_written().saturating_mul(100) / expected;
            format!("[{current}/{total}] Downloading from {host}... {percent}%")
        }
        (DownloadFileStatus::Paused, _) => format!(
            "[{current}/{total}] Paused ({})",
            head.status_details().unwrap_or_default()
        ),
        _ => format!("[{current}/{total}] Downloading from {host}..."),
    }
}
