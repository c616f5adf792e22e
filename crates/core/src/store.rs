// crates/core/src/store.rs
//! The job store: id allocation, authorization, state transitions and dispatch.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use sensorhub_types::{Job, JobId, JobKind, JobStatus, Node, Requestor};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::authz;
use crate::config::StoreConfig;
use crate::error::{PersistenceError, StoreError, StoreResult};
use crate::persistence::{FilePersistence, JobPersistence, PersistenceEngine, StreamReader};
use crate::registry::NodeRegistry;

/// First id handed out by a store with no persisted jobs.
pub const FIRST_JOB_ID: JobId = 1001;

#[derive(Debug, Default)]
struct JobIndex {
    jobs: HashMap<JobId, Job>,
    /// Ids in insertion order.
    order: Vec<JobId>,
    /// Jobs whose first write is in flight. Not visible to readers yet.
    reserved: HashMap<JobId, Job>,
    /// Jobs with a result stream upload in flight.
    uploading: HashSet<JobId>,
}

impl JobIndex {
    fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id) || self.reserved.contains_key(&id)
    }

    fn insert(&mut self, job: Job) {
        self.order.push(job.id);
        self.jobs.insert(job.id, job);
    }

    fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        Some(job)
    }

    fn in_order(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    /// The state that belongs on disk for `id`, reserved jobs included.
    fn latest(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).or_else(|| self.reserved.get(&id)).cloned()
    }
}

fn lock_index(index: &Mutex<JobIndex>) -> MutexGuard<'_, JobIndex> {
    index.lock().unwrap_or_else(|e| {
        tracing::error!("Mutex poisoned on job index: {e}");
        e.into_inner()
    })
}

/// Clears the in-flight upload mark of a job when dropped.
struct UploadGuard<'a> {
    index: &'a Mutex<JobIndex>,
    id: JobId,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        lock_index(self.index).uploading.remove(&self.id);
    }
}

/// Authoritative job index shared by request handlers and polling nodes.
///
/// All decisions are made against the in-memory index under a single lock.
/// Disk writes happen after the lock is released, on tasks of their own, and
/// always write whatever the index holds by the time the write starts. A
/// failed write never rolls the index back.
pub struct JobStore {
    next_id: AtomicU64,
    index: Arc<Mutex<JobIndex>>,
    nodes: NodeRegistry,
    persistence: Arc<PersistenceEngine>,
}

impl JobStore {
    /// Open a file-backed store rooted at `config.job_dir`, loading every
    /// persisted job before returning.
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        let backend = Arc::new(FilePersistence::new(&config.job_dir));
        Self::with_backend(backend, config).await
    }

    pub async fn with_backend(
        backend: Arc<dyn JobPersistence>,
        config: &StoreConfig,
    ) -> StoreResult<Self> {
        let persistence = PersistenceEngine::new(backend, config);
        let jobs = persistence.init().await?;

        let mut index = JobIndex::default();
        let mut next_id = FIRST_JOB_ID;
        for job in jobs {
            next_id = next_id.max(job.id.saturating_add(1));
            index.insert(job);
        }
        tracing::info!(
            jobs = index.jobs.len(),
            next_id,
            job_dir = %config.job_dir.display(),
            "Job store loaded"
        );

        Ok(Self {
            next_id: AtomicU64::new(next_id),
            index: Arc::new(Mutex::new(index)),
            nodes: NodeRegistry::new(),
            persistence: Arc::new(persistence),
        })
    }

    /// Start the background task that rewrites records whose write failed.
    /// It makes a final pass and exits once `shutdown` is cancelled.
    pub fn spawn_retry_worker(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            store
                .persistence
                .run_retry_worker(store.snapshots(), shutdown)
                .await;
        })
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn persistence(&self) -> &PersistenceEngine {
        &self.persistence
    }

    /// Number of stored jobs, ignoring authorization.
    pub fn job_count(&self) -> usize {
        self.index().jobs.len()
    }

    // ------------------------------------------------------------------
    // Operator-facing operations
    // ------------------------------------------------------------------

    /// Allocate the next id and return a pending job owned by the requestor.
    /// Nothing is stored until `add_job` or `add_pivot_job`.
    pub fn create_job(&self, requestor: &Requestor) -> Job {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Job::new(id, requestor.user_id.clone())
    }

    pub async fn add_job(&self, requestor: &Requestor, mut job: Job) -> StoreResult<Job> {
        if !authz::can_write(requestor, &job.user_id) {
            return Err(StoreError::Unauthorized(format!(
                "user {} may not add jobs for user {}",
                requestor.user_id, job.user_id
            )));
        }
        job.kind = JobKind::Ordinary;
        self.insert(job).await
    }

    pub async fn add_pivot_job(&self, requestor: &Requestor, mut job: Job) -> StoreResult<Job> {
        if !authz::can_create_pivot(requestor) {
            return Err(StoreError::Unauthorized(format!(
                "user {} may not create pivot jobs",
                requestor.user_id
            )));
        }
        job.kind = JobKind::Pivot;
        self.insert(job).await
    }

    /// The job, if it exists and the requestor may see it.
    pub fn get_job(&self, requestor: &Requestor, id: JobId) -> Option<Job> {
        self.index()
            .jobs
            .get(&id)
            .filter(|job| authz::can_read(requestor, &job.user_id))
            .cloned()
    }

    /// Every job the requestor may see, in insertion order.
    pub fn get_jobs(&self, requestor: &Requestor) -> Vec<Job> {
        self.index()
            .in_order()
            .filter(|job| authz::can_read(requestor, &job.user_id))
            .cloned()
            .collect()
    }

    /// Replace the editable parts of a pending job.
    ///
    /// The incoming value contributes its filter, file extension and status.
    /// The status may stay pending or move on to running, completed or
    /// failed; assigned is reserved for `next_job_for_node`. Ownership, node
    /// placement and the stored result always come from the stored job.
    pub async fn update_job(&self, requestor: &Requestor, mut incoming: Job) -> StoreResult<Job> {
        incoming.filter.validate()?;

        let updated = {
            let mut index = self.index();
            let existing = index
                .jobs
                .get_mut(&incoming.id)
                .ok_or(StoreError::NotFound(incoming.id))?;

            if !authz::can_write(requestor, &existing.user_id) {
                return Err(StoreError::Unauthorized(format!(
                    "user {} may not update job {}",
                    requestor.user_id, existing.id
                )));
            }
            if existing.status != JobStatus::Pending {
                return Err(StoreError::Ineligible {
                    id: existing.id,
                    status: existing.status,
                });
            }
            if incoming.status == JobStatus::Assigned {
                return Err(StoreError::InvalidTransition {
                    id: existing.id,
                    from: existing.status,
                    to: incoming.status,
                });
            }

            let now = Utc::now();
            incoming.user_id = existing.user_id.clone();
            incoming.node_id = existing.node_id.clone();
            incoming.kind = existing.kind;
            incoming.create_time = existing.create_time;
            incoming.assign_time = existing.assign_time;
            incoming.complete_time = existing.complete_time;
            incoming.fail_time = existing.fail_time;
            incoming.fail_count = existing.fail_count;
            incoming.artifact = existing.artifact.clone();
            incoming.update_time = now;
            match incoming.status {
                JobStatus::Completed => {
                    incoming.complete_time = Some(now);
                    incoming.error = None;
                }
                JobStatus::Failed => {
                    incoming.fail_time = Some(now);
                    incoming.fail_count += 1;
                }
                _ => incoming.error = existing.error.clone(),
            }

            *existing = incoming.clone();
            incoming
        };

        match updated.status {
            JobStatus::Completed => metrics::counter!("sensorhub_jobs_completed_total").increment(1),
            JobStatus::Failed => metrics::counter!("sensorhub_jobs_failed_total").increment(1),
            _ => {}
        }
        tracing::info!(
            job_id = updated.id,
            user_id = %requestor.user_id,
            status = %updated.status,
            "Job updated"
        );
        self.persist(updated.id).await;
        Ok(updated)
    }

    /// Remove a job the requestor owns (or may write). Deleting someone
    /// else's job, or a job that does not exist, does nothing.
    pub async fn delete_job(&self, requestor: &Requestor, id: JobId) -> Option<Job> {
        let removed = {
            let mut index = self.index();
            let writable = index
                .jobs
                .get(&id)
                .map(|job| authz::can_write(requestor, &job.user_id));
            match writable {
                Some(true) => index.remove(id),
                Some(false) => {
                    tracing::debug!(job_id = id, user_id = %requestor.user_id, "Ignoring delete of job owned by another user");
                    None
                }
                None => None,
            }
        }?;

        tracing::info!(job_id = id, user_id = %requestor.user_id, "Job deleted");
        self.persist(id).await;
        Some(removed)
    }

    /// Open the result stream of a job the requestor may see.
    pub async fn load_stream(
        &self,
        requestor: &Requestor,
        id: JobId,
    ) -> StoreResult<Option<StreamReader>> {
        match self.get_job(requestor, id) {
            Some(job) if job.artifact.is_some() => Ok(self.persistence.load_stream(id).await?),
            _ => Ok(None),
        }
    }

    /// Where the result stream of `job` is stored: `<job_dir>/<id>.bin`.
    pub fn get_stream_path(&self, job: &Job) -> Option<PathBuf> {
        self.persistence.stream_path(job.id)
    }

    // ------------------------------------------------------------------
    // Nodes and dispatch
    // ------------------------------------------------------------------

    pub fn create_node(&self, id: impl Into<String>) -> Node {
        self.nodes.create_node(id)
    }

    pub fn register_node(&self, node: Node) -> Node {
        self.nodes.upsert(node)
    }

    /// All known nodes. Nodes are infrastructure, so the list is not filtered
    /// by the requestor.
    pub fn list_nodes(&self, _requestor: &Requestor) -> Vec<Node> {
        self.nodes.list()
    }

    /// Claim the oldest pending job that is unassigned or bound to `node_id`,
    /// and bind it to `node_id` exactly as the node spelled it.
    ///
    /// The search and the claim happen under one lock acquisition, so a job
    /// is handed to exactly one caller no matter how many nodes poll at once.
    pub async fn next_job_for_node(&self, node_id: &str) -> Option<Job> {
        self.nodes.record_fetch(node_id);

        let claimed = {
            let mut index = self.index();
            let id = index
                .in_order()
                .filter(|job| job.is_claimable_by(node_id))
                .min_by_key(|job| (job.create_time, job.id))
                .map(|job| job.id)?;
            let job = index.jobs.get_mut(&id)?;

            let now = Utc::now();
            job.status = JobStatus::Assigned;
            job.node_id = node_id.to_string();
            job.assign_time = Some(now);
            job.update_time = now;
            job.clone()
        };

        metrics::counter!("sensorhub_jobs_claimed_total").increment(1);
        tracing::info!(job_id = claimed.id, node_id = %node_id, "Job assigned to node");
        self.persist(claimed.id).await;
        Some(claimed)
    }

    /// A node reports that it has started working on an assigned job.
    pub async fn start_job(&self, node_id: &str, id: JobId) -> StoreResult<Job> {
        let job = self.transition(node_id, id, JobStatus::Running, |_| {})?;
        tracing::info!(job_id = id, node_id = %node_id, "Job started");
        self.persist(id).await;
        Ok(job)
    }

    /// A node submits the result stream of a running job.
    ///
    /// The stream is fully written before the job is marked completed; if
    /// the upload is interrupted the job stays running. Only one upload per
    /// job may be in flight.
    pub async fn complete_job<R>(&self, node_id: &str, id: JobId, reader: &mut R) -> StoreResult<Job>
    where
        R: AsyncRead + Send + Unpin,
    {
        let upload = self.begin_upload(node_id, id)?;
        let artifact = self.persistence.save_stream(id, reader).await?;
        let size_bytes = artifact.size_bytes;

        let completed = self.transition(node_id, id, JobStatus::Completed, |job| {
            job.artifact = Some(artifact);
            job.complete_time = Some(job.update_time);
            job.error = None;
        });
        drop(upload);

        let job = match completed {
            Ok(job) => job,
            Err(e) => {
                // Deleted while the stream was uploading; drop the new stream too.
                if self.snapshot(id).is_none() {
                    self.persist(id).await;
                }
                return Err(e);
            }
        };

        metrics::counter!("sensorhub_jobs_completed_total").increment(1);
        tracing::info!(job_id = id, node_id = %node_id, size_bytes, "Job completed");
        self.persist(id).await;
        Ok(job)
    }

    /// A node reports that an assigned or running job could not be processed.
    pub async fn fail_job(&self, node_id: &str, id: JobId, reason: impl Into<String>) -> StoreResult<Job> {
        let reason = reason.into();
        let job = self.transition(node_id, id, JobStatus::Failed, |job| {
            job.fail_time = Some(job.update_time);
            job.fail_count += 1;
            job.error = Some(reason.clone());
        })?;

        metrics::counter!("sensorhub_jobs_failed_total").increment(1);
        tracing::warn!(job_id = id, node_id = %node_id, reason = %reason, "Job failed");
        self.persist(id).await;
        Ok(job)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Reserve the id, write the record, then publish the job.
    ///
    /// The write and the publish run on their own task, so a caller that
    /// goes away mid-write neither strands the reservation nor leaves a
    /// record on disk that memory does not know about.
    async fn insert(&self, job: Job) -> StoreResult<Job> {
        job.filter.validate()?;

        let id = job.id;
        {
            let mut index = self.index();
            if index.contains(id) {
                return Err(StoreError::Conflict(id));
            }
            index.reserved.insert(id, job);
        }
        // Ids set by the caller must never be handed out again.
        self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);

        let index = Arc::clone(&self.index);
        let write = self.persistence.spawn_sync(id, self.snapshots());
        let commit = tokio::spawn(async move {
            let saved = write.await.unwrap_or(Err(PersistenceError::Shutdown));
            let mut index = lock_index(&index);
            let Some(job) = index.reserved.remove(&id) else {
                return Err(StoreError::NotFound(id));
            };
            if let Err(e) = saved {
                tracing::error!(job_id = id, error = %e, "Job write failed; job not stored");
                return Err(StoreError::from(e));
            }
            index.insert(job.clone());
            drop(index);

            metrics::counter!("sensorhub_jobs_added_total", "kind" => kind_label(job.kind)).increment(1);
            tracing::info!(job_id = id, user_id = %job.user_id, kind = kind_label(job.kind), "Job added");
            Ok(job)
        });

        commit
            .await
            .unwrap_or(Err(StoreError::Persistence(PersistenceError::Shutdown)))
    }

    /// Mark an upload for `id` as in flight, after checking that the job is
    /// bound to `node_id` and running.
    fn begin_upload(&self, node_id: &str, id: JobId) -> StoreResult<UploadGuard<'_>> {
        let mut index = self.index();
        let job = index
            .jobs
            .get(&id)
            .filter(|job| job.is_bound_to(node_id))
            .ok_or(StoreError::NotFound(id))?;
        if !job.status.can_transition_to(JobStatus::Completed) {
            return Err(StoreError::Ineligible {
                id,
                status: job.status,
            });
        }
        if !index.uploading.insert(id) {
            return Err(StoreError::UploadInProgress(id));
        }
        Ok(UploadGuard {
            index: &self.index,
            id,
        })
    }

    /// Move a job bound to `node_id` to `to`, applying `apply` under the same lock.
    /// Jobs bound to other nodes are reported as missing.
    fn transition(
        &self,
        node_id: &str,
        id: JobId,
        to: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> StoreResult<Job> {
        let mut index = self.index();
        let job = index
            .jobs
            .get_mut(&id)
            .filter(|job| job.is_bound_to(node_id))
            .ok_or(StoreError::NotFound(id))?;
        if !job.status.can_transition_to(to) {
            return Err(StoreError::Ineligible {
                id,
                status: job.status,
            });
        }

        job.status = to;
        job.update_time = Utc::now();
        apply(job);
        Ok(job.clone())
    }

    /// Bring the record of `id` in line with memory after a change. Failures
    /// are logged, never returned: memory stays authoritative and transient
    /// failures are retried. The write finishes even if this future is dropped.
    async fn persist(&self, id: JobId) {
        match self.persistence.spawn_sync(id, self.snapshots()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(job_id = id, error = %e, "Failed to persist job change"),
            Err(e) => tracing::error!(job_id = id, error = %e, "Job write task failed"),
        }
    }

    /// Lookup handed to the persistence engine: the state of a job as it
    /// should be on disk, or `None` once it is gone.
    fn snapshots(&self) -> impl Fn(JobId) -> Option<Job> + Send + Sync + 'static {
        let index = Arc::clone(&self.index);
        move |id| lock_index(&index).latest(id)
    }

    /// Current in-memory copy of a job, ignoring authorization.
    fn snapshot(&self, id: JobId) -> Option<Job> {
        self.index().jobs.get(&id).cloned()
    }

    fn index(&self) -> MutexGuard<'_, JobIndex> {
        lock_index(&self.index)
    }
}

fn kind_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Ordinary => "ordinary",
        JobKind::Pivot => "pivot",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sensorhub_types::{JobFilter, Permission};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const MY_USER_ID: &str = "123";
    const ANOTHER_USER_ID: &str = "124";

    fn me() -> Requestor {
        Requestor::new(MY_USER_ID)
    }

    fn privileged() -> Requestor {
        Requestor::new(MY_USER_ID)
            .with_permission(Permission::JobsPivot)
            .with_permission(Permission::JobsReadAll)
            .with_permission(Permission::JobsWriteAll)
    }

    async fn test_store() -> (TempDir, JobStore) {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(&StoreConfig::with_job_dir(dir.path().join("jobs")))
            .await
            .expect("open job store");
        let mut node = store.create_node("foo");
        node.role = "rolo".into();
        node.description = "desc".into();
        node.address = "addr".into();
        store.register_node(node);
        (dir, store)
    }

    /// Store a job owned by `owner` with a fixed id, bypassing ownership checks.
    async fn seed(store: &JobStore, id: JobId, owner: &str) -> Job {
        let mut job = store.create_job(&me());
        job.id = id;
        job.user_id = owner.to_string();
        store.insert(job).await.unwrap()
    }

    #[tokio::test]
    async fn test_ids_start_at_1001_and_are_never_reused() {
        let (_dir, store) = test_store().await;

        let first = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        let second = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        assert_eq!((first.id, second.id), (1001, 1002));

        store.delete_job(&me(), 1002).await.unwrap();
        assert_eq!(store.create_job(&me()).id, 1003);
    }

    #[tokio::test]
    async fn test_create_job_defaults() {
        let (_dir, store) = test_store().await;
        let job = store.create_job(&me());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.user_id, MY_USER_ID);
        assert!(job.is_unassigned());
        assert!(store.get_jobs(&me()).is_empty());
    }

    #[tokio::test]
    async fn test_add_and_fetch_jobs() {
        let (_dir, store) = test_store().await;
        let job = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        store.add_job(&me(), store.create_job(&me())).await.unwrap();

        let fetched = store.get_job(&me(), job.id).unwrap();
        assert_eq!(fetched.user_id, MY_USER_ID);
        assert_eq!(fetched.kind, JobKind::Ordinary);
        assert!(store.get_job(&me(), 1003).is_none());
        assert_eq!(
            store.get_jobs(&me()).iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![1001, 1002]
        );
    }

    #[tokio::test]
    async fn test_add_job_for_another_user_is_unauthorized() {
        let (_dir, store) = test_store().await;
        let mut job = store.create_job(&me());
        job.user_id = ANOTHER_USER_ID.into();

        let err = store.add_job(&me(), job).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert!(store.get_jobs(&privileged()).is_empty());
    }

    #[tokio::test]
    async fn test_add_duplicate_id_conflicts() {
        let (_dir, store) = test_store().await;
        let job = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        let err = store.add_job(&me(), job).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(1001)));
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_filter() {
        let (_dir, store) = test_store().await;
        let now = Utc::now();
        let job = store.create_job(&me()).with_filter(JobFilter {
            begin_time: Some(now),
            end_time: Some(now - chrono::Duration::hours(1)),
            ..JobFilter::default()
        });
        let err = store.add_job(&me(), job).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn test_pivot_requires_permission() {
        let (_dir, store) = test_store().await;
        let err = store
            .add_pivot_job(&me(), store.create_job(&me()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert!(store.get_job(&privileged(), 1001).is_none());

        let job = store
            .add_pivot_job(&privileged(), store.create_job(&privileged()))
            .await
            .unwrap();
        assert_eq!(job.kind, JobKind::Pivot);
        assert_eq!(store.get_job(&me(), job.id).unwrap().user_id, MY_USER_ID);
    }

    #[tokio::test]
    async fn test_read_isolation() {
        let (_dir, store) = test_store().await;
        seed(&store, 10002, ANOTHER_USER_ID).await;
        seed(&store, 10001, MY_USER_ID).await;

        assert_eq!(store.get_job(&me(), 10001).unwrap().id, 10001);
        assert!(store.get_job(&me(), 10002).is_none());
        assert_eq!(store.get_jobs(&me()).len(), 1);

        let auditor = Requestor::new("999").with_permission(Permission::JobsReadAll);
        assert_eq!(
            store.get_jobs(&auditor).iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![10002, 10001]
        );
    }

    #[tokio::test]
    async fn test_delete_isolation() {
        let (_dir, store) = test_store().await;
        seed(&store, 10002, ANOTHER_USER_ID).await;
        seed(&store, 10001, MY_USER_ID).await;

        assert!(store.delete_job(&me(), 10002).await.is_none());
        assert!(store.get_job(&privileged(), 10002).is_some());

        assert!(store.delete_job(&me(), 10001).await.is_some());
        assert!(store.get_job(&privileged(), 10001).is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_files_and_is_idempotent() {
        let (dir, store) = test_store().await;
        let job_dir = dir.path().join("jobs");
        let job = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        store.next_job_for_node("foo").await.unwrap();
        store.start_job("foo", job.id).await.unwrap();
        store
            .complete_job("foo", job.id, &mut b"result".as_slice())
            .await
            .unwrap();
        assert!(job_dir.join("1001.json").exists());
        assert!(job_dir.join("1001.bin").exists());

        assert!(store.delete_job(&me(), job.id).await.is_some());
        assert!(!job_dir.join("1001.json").exists());
        assert!(!job_dir.join("1001.bin").exists());
        assert!(store.delete_job(&me(), job.id).await.is_none());
    }

    #[tokio::test]
    async fn test_stream_path() {
        let (dir, store) = test_store().await;
        let job = store.create_job(&me());
        assert_eq!(
            store.get_stream_path(&job),
            Some(dir.path().join("jobs").join("1001.bin"))
        );

        // Path derivation alone never touches the directory.
        let backend = FilePersistence::new("/tmp/sensoroni.jobs");
        assert_eq!(
            backend.stream_path(1001),
            Some(PathBuf::from("/tmp/sensoroni.jobs/1001.bin"))
        );
    }

    #[tokio::test]
    async fn test_update_ineligible_when_not_pending() {
        let (_dir, store) = test_store().await;
        let job = seed(&store, 1212, MY_USER_ID).await;
        store.next_job_for_node("foo").await.unwrap();

        let err = store.update_job(&me(), job).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ineligible {
                id: 1212,
                status: JobStatus::Assigned
            }
        ));
    }

    #[tokio::test]
    async fn test_update_preserves_owner_and_node() {
        let (_dir, store) = test_store().await;
        let mut job = store.create_job(&me());
        job.id = 1212;
        job.node_id = "some node".into();
        store.insert(job.clone()).await.unwrap();

        let mut incoming = store.create_job(&me());
        incoming.id = 1212;
        incoming.user_id = ANOTHER_USER_ID.into();
        incoming.node_id = "some other node".into();
        incoming.filter.protocol = Some("tcp".into());

        let updated = store.update_job(&me(), incoming).await.unwrap();
        assert_eq!(updated.user_id, job.user_id);
        assert_eq!(updated.node_id, job.node_id);
        assert_eq!(updated.create_time, job.create_time);
        assert_eq!(updated.filter.protocol.as_deref(), Some("tcp"));
        assert_eq!(store.get_job(&me(), 1212).unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_by_other_user_is_unauthorized() {
        let (_dir, store) = test_store().await;
        let job = seed(&store, 1212, ANOTHER_USER_ID).await;
        let err = store.update_job(&me(), job).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_update_moves_pending_job_on_but_never_to_assigned() {
        let (_dir, store) = test_store().await;
        let mut job = seed(&store, 1212, MY_USER_ID).await;

        job.status = JobStatus::Assigned;
        let err = store.update_job(&me(), job.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                id: 1212,
                from: JobStatus::Pending,
                to: JobStatus::Assigned
            }
        ));
        assert_eq!(store.get_job(&me(), 1212).unwrap().status, JobStatus::Pending);

        job.status = JobStatus::Failed;
        job.error = Some("cancelled by analyst".into());
        let failed = store.update_job(&me(), job).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.fail_time.is_some());
        assert_eq!(failed.fail_count, 1);
        assert_eq!(failed.error.as_deref(), Some("cancelled by analyst"));
        assert_eq!(store.get_job(&me(), 1212).unwrap(), failed);

        // Terminal now, so no further updates.
        let err = store.update_job(&me(), failed).await.unwrap_err();
        assert!(matches!(err, StoreError::Ineligible { .. }));
    }

    #[tokio::test]
    async fn test_update_to_completed_stamps_completion() {
        let (_dir, store) = test_store().await;
        let mut job = seed(&store, 1212, MY_USER_ID).await;
        job.status = JobStatus::Completed;

        let done = store.update_job(&me(), job).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.complete_time.is_some());
        assert!(done.artifact.is_none());
        assert!(store.next_job_for_node("foo").await.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let (_dir, store) = test_store().await;
        let job = store.create_job(&me());
        let err = store.update_job(&me(), job).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(1001)));
    }

    #[tokio::test]
    async fn test_next_job_claims_oldest_eligible() {
        let (_dir, store) = test_store().await;
        let other = store.create_job(&me()).with_node("bar");
        store.add_job(&me(), other).await.unwrap();
        let mine = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        store.add_job(&me(), store.create_job(&me())).await.unwrap();

        let claimed = store.next_job_for_node("foo").await.unwrap();
        assert_eq!(claimed.id, mine.id);
        assert_eq!(claimed.status, JobStatus::Assigned);
        assert_eq!(claimed.node_id, "foo");
        assert!(claimed.assign_time.is_some());

        let next = store.next_job_for_node("foo").await.unwrap();
        assert_eq!(next.id, 1003);
        assert!(store.next_job_for_node("foo").await.is_none());
        assert_eq!(store.next_job_for_node("bar").await.unwrap().id, 1001);
    }

    #[tokio::test]
    async fn test_claim_binds_node_id_as_polled() {
        let (_dir, store) = test_store().await;
        let job = store.create_job(&me()).with_node("Foo");
        store.add_job(&me(), job).await.unwrap();

        let claimed = store.next_job_for_node("foo").await.unwrap();
        assert_eq!(claimed.node_id, "foo");
        assert_eq!(store.get_job(&me(), claimed.id).unwrap().node_id, "foo");
    }

    #[tokio::test]
    async fn test_largest_id_does_not_overflow() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::with_job_dir(dir.path().join("jobs"));
        {
            let store = JobStore::open(&config).await.unwrap();
            seed(&store, JobId::MAX, MY_USER_ID).await;
            assert!(store.get_job(&me(), JobId::MAX).is_some());
        }

        let store = JobStore::open(&config).await.unwrap();
        assert_eq!(store.job_count(), 1);
        assert!(store.get_job(&me(), JobId::MAX).is_some());
    }

    #[tokio::test]
    async fn test_poll_registers_unknown_node() {
        let (_dir, store) = test_store().await;
        assert!(store.next_job_for_node("baz").await.is_none());

        let nodes = store.list_nodes(&me());
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().any(|n| n.id == "baz" && n.last_fetch.is_some()));
    }

    #[tokio::test]
    async fn test_node_lifecycle_to_completion() {
        let (_dir, store) = test_store().await;
        let job = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        store.next_job_for_node("foo").await.unwrap();

        let err = store.start_job("bar", job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let running = store.start_job("foo", job.id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);

        let payload = b"packet capture".to_vec();
        let done = store
            .complete_job("foo", job.id, &mut payload.as_slice())
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.complete_time.is_some());
        assert_eq!(done.artifact.as_ref().map(|a| a.size_bytes), Some(payload.len() as u64));

        let mut reader = store.load_stream(&me(), job.id).await.unwrap().unwrap();
        let mut read_back = Vec::new();
        reader.read_to_end(&mut read_back).await.unwrap();
        assert_eq!(read_back, payload);

        let other = Requestor::new(ANOTHER_USER_ID);
        assert!(store.load_stream(&other, job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_running() {
        let (_dir, store) = test_store().await;
        let job = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        store.next_job_for_node("foo").await.unwrap();

        let err = store
            .complete_job("foo", job.id, &mut b"x".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ineligible {
                status: JobStatus::Assigned,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_one_upload_per_job_and_cancelled_upload_releases_it() {
        let (dir, store) = test_store().await;
        let job = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        store.next_job_for_node("foo").await.unwrap();
        store.start_job("foo", job.id).await.unwrap();

        let (_tx, mut rx) = tokio::io::duplex(64);
        {
            let first = store.complete_job("foo", job.id, &mut rx);
            tokio::pin!(first);
            tokio::select! {
                biased;
                _ = &mut first => panic!("upload with an open sender should still be waiting"),
                second = async {
                    tokio::task::yield_now().await;
                    store.complete_job("foo", job.id, &mut b"x".as_slice()).await
                } => assert!(matches!(second, Err(StoreError::UploadInProgress(_)))),
            }
        }

        // The first upload was dropped mid-stream: no scratch file, job still running.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("jobs"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(crate::paths::PARTIAL_SUFFIX))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
        assert_eq!(store.get_job(&me(), job.id).unwrap().status, JobStatus::Running);

        let done = store
            .complete_job("foo", job.id, &mut b"pcap".as_slice())
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_fail_job_records_reason() {
        let (_dir, store) = test_store().await;
        let job = store.add_job(&me(), store.create_job(&me())).await.unwrap();
        store.next_job_for_node("foo").await.unwrap();

        let failed = store.fail_job("foo", job.id, "no packets in range").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.fail_count, 1);
        assert_eq!(failed.error.as_deref(), Some("no packets in range"));

        let err = store.start_job("foo", job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Ineligible { .. }));
    }

    #[tokio::test]
    async fn test_reopen_restores_jobs_and_id_sequence() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::with_job_dir(dir.path().join("jobs"));
        {
            let store = JobStore::open(&config).await.unwrap();
            store.add_job(&me(), store.create_job(&me())).await.unwrap();
            store.add_job(&me(), store.create_job(&me())).await.unwrap();
            store.next_job_for_node("foo").await.unwrap();
        }

        let store = JobStore::open(&config).await.unwrap();
        let jobs = store.get_jobs(&me());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].status, JobStatus::Assigned);
        assert_eq!(jobs[0].node_id, "foo");
        assert_eq!(store.create_job(&me()).id, 1003);
    }

    #[tokio::test]
    async fn test_end_to_end_poll_with_nothing_for_node() {
        let (_dir, store) = test_store().await;
        let job = store.create_job(&me()).with_node("bar");
        store.add_job(&me(), job).await.unwrap();

        assert_eq!(store.get_jobs(&me()).len(), 1);
        assert!(store.next_job_for_node("foo").await.is_none());
    }
}
