//! In-memory download queue.
//!
//! The queue holds the files the manager currently owns, in start order.
//! All mutation and snapshot reads go through one mutex that is never held
//! across an `.await` or a backend call.
//!
//! # Overview
//!
//! - [`DownloadQueue::insert_superseding`] appends a file and evicts any file
//!   with the same URL, so the queue never holds two live files for one URL
//! - [`DownloadQueue::claim_head`] hands out the first file that is not
//!   paused, exactly once
//! - [`DownloadQueue::remove`] drops a file by identity

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::TaskHandle;
use crate::file::{DownloadFile, DownloadFileStatus};

/// Ordered set of files owned by the manager.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    files: Mutex<Vec<Arc<DownloadFile>>>,
}

impl DownloadQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<DownloadFile>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `file` without supersession checks.
    pub fn push(&self, file: Arc<DownloadFile>) {
        self.lock().push(file);
    }

    /// Appends `file` and removes every other file with the same URL.
    ///
    /// Returns the removed files in queue order.
    pub fn insert_superseding(&self, file: Arc<DownloadFile>) -> Vec<Arc<DownloadFile>> {
        let mut files = self.lock();
        let mut superseded = Vec::new();
        files.retain(|queued| {
            if queued.url() == file.url() && !Arc::ptr_eq(queued, &file) {
                superseded.push(Arc::clone(queued));
                false
            } else {
                true
            }
        });
        if !files.iter().any(|queued| Arc::ptr_eq(queued, &file)) {
            files.push(file);
        }
        superseded
    }

    /// Removes `file`. Returns false if it was not queued.
    pub fn remove(&self, file: &Arc<DownloadFile>) -> bool {
        let mut files = self.lock();
        let before = files.len();
        files.retain(|queued| !Arc::ptr_eq(queued, file));
        files.len() != before
    }

    /// Copy of the current contents, in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<DownloadFile>> {
        self.lock().clone()
    }

    #[must_use]
    pub fn find_by_url(&self, url: &str) -> Option<Arc<DownloadFile>> {
        self.lock().iter().find(|file| file.url() == url).cloned()
    }

    #[must_use]
    pub fn find_by_task(&self, task: TaskHandle) -> Option<Arc<DownloadFile>> {
        self.lock()
            .iter()
            .find(|file| file.task() == Some(task))
            .cloned()
    }

    /// Claims the first file that is not paused, if it is `Initialized` and
    /// not claimed yet.
    ///
    /// Paused files are stepped over so a transfer waiting on the network does
    /// not hold back the files behind it. Any other active file blocks the rest
    /// of the queue until it leaves.
    #[must_use]
    pub fn claim_head(&self) -> Option<Arc<DownloadFile>> {
        let files = self.lock();
        let head = files
            .iter()
            .find(|file| file.status() != DownloadFileStatus::Paused)?;
        if head.status() == DownloadFileStatus::Initialized && head.try_claim() {
            Some(Arc::clone(head))
        } else {
            None
        }
    }

    #[must_use]
    pub fn contains(&self, file: &Arc<DownloadFile>) -> bool {
        self.lock().iter().any(|queued| Arc::ptr_eq(queued, file))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::file::{Headers, Trigger};

    fn initialized(url: &str) -> Arc<DownloadFile> {
        let file = Arc::new(DownloadFile::new(url, Headers::new()).unwrap());
        file.transition(Trigger::Accepted, None).unwrap();
        file
    }

    #[test]
    fn test_insert_superseding_evicts_same_url() {
        let queue = DownloadQueue::new();
        let a = initialized("http://x/a.zip");
        let other = initialized("http://x/b.zip");
        let b = initialized("http://x/a.zip");

        assert!(queue.insert_superseding(Arc::clone(&a)).is_empty());
        assert!(queue.insert_superseding(Arc::clone(&other)).is_empty());
        let superseded = queue.insert_superseding(Arc::clone(&b));

        assert_eq!(superseded.len(), 1);
        assert!(Arc::ptr_eq(&superseded[0], &a));
        let urls: Vec<_> = queue.snapshot().iter().map(|f| f.url().to_string()).collect();
        assert_eq!(urls, vec!["http://x/b.zip", "http://x/a.zip"]);
    }

    #[test]
    fn test_insert_superseding_same_file_twice_is_idempotent() {
        let queue = DownloadQueue::new();
        let a = initialized("http://x/a.zip");
        queue.insert_superseding(Arc::clone(&a));
        assert!(queue.insert_superseding(Arc::clone(&a)).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_is_by_identity() {
        let queue = DownloadQueue::new();
        let a = initialized("http://x/a.zip");
        let twin = initialized("http://x/a.zip");
        queue.push(Arc::clone(&a));

        assert!(!queue.remove(&twin));
        assert!(queue.contains(&a));
        assert!(queue.remove(&a));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_claim_head_only_once() {
        let queue = DownloadQueue::new();
        let a = initialized("http://x/a.zip");
        let b = initialized("http://x/b.zip");
        queue.push(Arc::clone(&a));
        queue.push(Arc::clone(&b));

        let claimed = queue.claim_head().unwrap();
        assert!(Arc::ptr_eq(&claimed, &a));
        // b waits behind the claimed head.
        assert!(queue.claim_head().is_none());

        queue.remove(&a);
        assert!(Arc::ptr_eq(&queue.claim_head().unwrap(), &b));
    }

    #[test]
    fn test_claim_head_steps_over_paused_files() {
        let queue = DownloadQueue::new();
        let paused = initialized("http://x/a.zip");
        paused.transition(Trigger::HandedOff, None).unwrap();
        paused.transition(Trigger::Paused, Some("Paused.WaitingForNetwork".into()));
        let next = initialized("http://x/b.zip");
        let last = initialized("http://x/c.zip");
        queue.push(Arc::clone(&paused));
        queue.push(Arc::clone(&next));
        queue.push(Arc::clone(&last));

        assert!(Arc::ptr_eq(&queue.claim_head().unwrap(), &next));
        // The claimed file now blocks the rest.
        assert!(queue.claim_head().is_none());
    }

    #[test]
    fn test_claim_head_running_file_blocks() {
        let queue = DownloadQueue::new();
        let running = initialized("http://x/a.zip");
        running.transition(Trigger::HandedOff, None).unwrap();
        running.transition(Trigger::Resumed, None).unwrap();
        queue.push(running);
        queue.push(initialized("http://x/b.zip"));

        assert!(queue.claim_head().is_none());
    }

    #[test]
    fn test_claim_head_skips_non_initialized_head() {
        let queue = DownloadQueue::new();
        let file = Arc::new(DownloadFile::new("http://x/a.zip", Headers::new()).unwrap());
        queue.push(file);
        assert!(queue.claim_head().is_none());
    }

    #[test]
    fn test_find_by_task() {
        let queue = DownloadQueue::new();
        let a = initialized("http://x/a.zip");
        a.set_task(TaskHandle::new(5));
        queue.push(Arc::clone(&a));

        assert!(Arc::ptr_eq(&queue.find_by_task(TaskHandle::new(5)).unwrap(), &a));
        assert!(queue.find_by_task(TaskHandle::new(6)).is_none());
        assert!(queue.find_by_url("http://x/a.zip").is_some());
    }
}
