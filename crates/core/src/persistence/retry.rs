// crates/core/src/persistence/retry.rs
//! Queue of job records whose last write failed.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use sensorhub_types::JobId;

/// Pending record rewrites keyed by job id, with the number of failed attempts.
///
/// Only ids are queued. The retry pass re-reads the job from the in-memory
/// index, so the newest state is what lands on disk and jobs deleted in the
/// meantime have their files removed instead.
#[derive(Debug, Default)]
pub struct RetryQueue {
    pending: Mutex<BTreeMap<JobId, u32>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `id` for another write. Attempts already recorded for it are kept.
    pub fn schedule(&self, id: JobId) {
        self.lock().entry(id).or_insert(0);
    }

    /// Put `id` back after a failed retry, unless a fresh failure re-queued it first.
    pub(crate) fn requeue(&self, id: JobId, attempts: u32) {
        let mut pending = self.lock();
        let entry = pending.entry(id).or_insert(attempts);
        *entry = (*entry).max(attempts);
    }

    /// Forget `id`, e.g. after a successful write or a delete.
    pub fn cancel(&self, id: JobId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything queued, in id order.
    pub(crate) fn take_all(&self) -> Vec<(JobId, u32)> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobId, u32>> {
        self.pending.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on retry queue: {e}");
            e.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_deduplicated() {
        let queue = RetryQueue::new();
        queue.schedule(1001);
        queue.schedule(1001);
        queue.schedule(1002);
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(1001));
    }

    #[test]
    fn test_take_all_drains_in_id_order() {
        let queue = RetryQueue::new();
        queue.schedule(1003);
        queue.schedule(1001);
        assert_eq!(queue.take_all(), vec![(1001, 0), (1003, 0)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_keeps_highest_attempt_count() {
        let queue = RetryQueue::new();
        queue.requeue(1001, 2);
        queue.schedule(1001);
        assert_eq!(queue.take_all(), vec![(1001, 2)]);

        queue.schedule(1001);
        queue.requeue(1001, 3);
        assert_eq!(queue.take_all(), vec![(1001, 3)]);
    }

    #[test]
    fn test_cancel() {
        let queue = RetryQueue::new();
        queue.schedule(1001);
        assert!(queue.cancel(1001));
        assert!(!queue.cancel(1001));
        assert!(queue.is_empty());
    }
}
