// crates/core/src/persistence/engine.rs
//! Persistence engine: a storage backend plus timed retry of failed writes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sensorhub_types::{ArtifactStream, Job, JobId};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{JobPersistence, RetryQueue, StreamReader};
use crate::config::StoreConfig;
use crate::error::PersistenceError;

/// Result of a record write that did not fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The latest state of the job is on disk.
    Persisted,
    /// The job no longer exists, so its files were removed.
    Removed,
    /// The write failed transiently and is queued for the retry worker.
    Deferred,
}

/// Counts from one retry pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    pub persisted: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Queued jobs that were deleted in the meantime; their files were removed.
    pub removed: usize,
}

/// One async lock per job id with a write in flight.
#[derive(Default)]
struct WriteLocks {
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl WriteLocks {
    fn get(&self, id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.lock().entry(id).or_default())
    }

    /// Drop the entry for `id` once no other writer holds or waits on it.
    fn release(&self, id: JobId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.lock();
        drop(lock);
        if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&id);
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on job write locks: {e}");
            e.into_inner()
        })
    }
}

/// Wraps a backend so that each job's record is written one write at a time,
/// always from the newest in-memory state.
///
/// Callers never hand the engine a `Job` to write. They pass a `current`
/// lookup instead, and the engine reads it after taking the job's write lock:
/// a write that was overtaken by a newer change writes the newer change, and
/// a job deleted in the meantime has its files removed instead.
pub struct PersistenceEngine {
    backend: Arc<dyn JobPersistence>,
    retries: RetryQueue,
    writes: WriteLocks,
    retry_interval: Duration,
    max_write_retries: u32,
}

impl PersistenceEngine {
    pub fn new(backend: Arc<dyn JobPersistence>, config: &StoreConfig) -> Self {
        Self {
            backend,
            retries: RetryQueue::new(),
            writes: WriteLocks::default(),
            retry_interval: config.retry_interval(),
            max_write_retries: config.max_write_retries,
        }
    }

    /// Prepare the backend and read back every persisted job.
    /// Any error here means the store cannot start.
    pub async fn init(&self) -> Result<Vec<Job>, PersistenceError> {
        self.backend.prepare().await?;
        self.backend.load_all().await
    }

    /// Bring the stored record of `id` in line with `current(id)`.
    ///
    /// Fatal failures are returned. Transient failures are logged and the job
    /// is queued for the retry worker, so the caller's operation still succeeds.
    pub async fn sync_job<F>(&self, id: JobId, current: &F) -> Result<SaveOutcome, PersistenceError>
    where
        F: Fn(JobId) -> Option<Job>,
    {
        let lock = self.writes.get(id);
        let result = {
            let _write = lock.lock().await;
            match self.write_latest(id, current).await {
                Ok(outcome) => {
                    self.retries.cancel(id);
                    Ok(outcome)
                }
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => {
                    tracing::warn!(
                        job_id = id,
                        error = %e,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        "Job write failed, scheduling retry"
                    );
                    metrics::counter!("sensorhub_persistence_deferred_total").increment(1);
                    self.retries.schedule(id);
                    Ok(SaveOutcome::Deferred)
                }
            }
        };
        self.writes.release(id, lock);
        result
    }

    /// `sync_job` on a task of its own. Dropping the returned handle does not
    /// stop the write.
    pub fn spawn_sync<F>(
        self: &Arc<Self>,
        id: JobId,
        current: F,
    ) -> JoinHandle<Result<SaveOutcome, PersistenceError>>
    where
        F: Fn(JobId) -> Option<Job> + Send + Sync + 'static,
    {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.sync_job(id, &current).await })
    }

    pub async fn save_stream(
        &self,
        id: JobId,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ArtifactStream, PersistenceError> {
        self.backend.save_stream(id, reader).await
    }

    pub async fn load_stream(&self, id: JobId) -> Result<Option<StreamReader>, PersistenceError> {
        self.backend.load_stream(id).await
    }

    pub fn stream_path(&self, id: JobId) -> Option<PathBuf> {
        self.backend.stream_path(id)
    }

    pub fn retries(&self) -> &RetryQueue {
        &self.retries
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Jobs with a write holding or waiting on their lock.
    pub fn writes_in_flight(&self) -> usize {
        self.writes.len()
    }

    /// Rewrite every queued record once, using `current` to fetch the latest
    /// in-memory state of each job.
    pub async fn retry_pending<F>(&self, current: &F) -> RetryReport
    where
        F: Fn(JobId) -> Option<Job>,
    {
        let mut report = RetryReport::default();

        for (id, attempts) in self.retries.take_all() {
            metrics::counter!("sensorhub_persistence_retries_total").increment(1);
            let lock = self.writes.get(id);
            {
                let _write = lock.lock().await;
                match self.write_latest(id, current).await {
                    Ok(SaveOutcome::Removed) => {
                        tracing::debug!(job_id = id, "Dropped retry of deleted job");
                        report.removed += 1;
                    }
                    Ok(_) => {
                        tracing::info!(job_id = id, attempt = attempts + 1, "Job write recovered");
                        report.persisted += 1;
                    }
                    Err(e) => {
                        let attempts = attempts + 1;
                        if e.is_fatal() || attempts >= self.max_write_retries {
                            tracing::error!(
                                job_id = id,
                                attempt = attempts,
                                error = %e,
                                "Giving up on job write; record stays in memory only"
                            );
                            metrics::counter!("sensorhub_persistence_dropped_total").increment(1);
                            report.dropped += 1;
                        } else {
                            tracing::warn!(job_id = id, attempt = attempts, error = %e, "Job write retry failed");
                            self.retries.requeue(id, attempts);
                            report.requeued += 1;
                        }
                    }
                }
            }
            self.writes.release(id, lock);
        }

        report
    }

    /// Run retry passes every `retry_interval` until `shutdown` fires, then
    /// make one final pass before returning.
    pub async fn run_retry_worker<F>(&self, current: F, shutdown: CancellationToken)
    where
        F: Fn(JobId) -> Option<Job>,
    {
        tracing::debug!(
            interval_ms = self.retry_interval.as_millis() as u64,
            "Persistence retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.retry_interval) => {
                    if !self.retries.is_empty() {
                        let report = self.retry_pending(&current).await;
                        tracing::debug!(?report, "Persistence retry pass complete");
                    }
                }
            }
        }

        if !self.retries.is_empty() {
            let report = self.retry_pending(&current).await;
            if report.requeued > 0 {
                tracing::warn!(
                    abandoned = report.requeued,
                    "Shutting down with job writes still failing"
                );
            }
        }
        tracing::debug!("Persistence retry worker stopped");
    }

    /// Must be called with the write lock of `id` held.
    async fn write_latest<F>(&self, id: JobId, current: &F) -> Result<SaveOutcome, PersistenceError>
    where
        F: Fn(JobId) -> Option<Job>,
    {
        match current(id) {
            Some(job) => {
                self.backend.save_job(&job).await?;
                Ok(SaveOutcome::Persisted)
            }
            None => {
                self.backend.delete_job(id).await?;
                Ok(SaveOutcome::Removed)
            }
        }
    }
}
