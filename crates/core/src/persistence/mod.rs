// crates/core/src/persistence/mod.rs
//! Durable storage of job records and result streams.
//!
//! Provides:
//! - `JobPersistence` - capability trait implemented by storage backends
//! - `FilePersistence` - one JSON record and one `.bin` stream per job in a directory
//! - `PersistenceEngine` - wraps a backend with background retry of failed writes

pub mod engine;
pub mod file;
pub mod retry;

pub use engine::{PersistenceEngine, RetryReport, SaveOutcome};
pub use file::FilePersistence;
pub use retry::RetryQueue;

use std::path::PathBuf;

use async_trait::async_trait;
use sensorhub_types::{ArtifactStream, Job, JobId};
use tokio::io::AsyncRead;

use crate::error::PersistenceError;

/// Readable handle on a stored result stream.
pub type StreamReader = Box<dyn AsyncRead + Send + Unpin>;

/// Storage backend for job records and result streams.
///
/// Implementations must make each write all-or-nothing: a cancelled or failed
/// write never leaves a truncated record or stream behind under its final name.
#[async_trait]
pub trait JobPersistence: Send + Sync {
    /// Make the backend ready for use. Failure here is fatal to startup.
    async fn prepare(&self) -> Result<(), PersistenceError>;

    /// Write the full metadata record for `job`, replacing any previous version.
    async fn save_job(&self, job: &Job) -> Result<(), PersistenceError>;

    /// Every persisted job, ordered by id.
    async fn load_all(&self) -> Result<Vec<Job>, PersistenceError>;

    async fn save_stream(
        &self,
        id: JobId,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ArtifactStream, PersistenceError>;

    /// `None` when no stream has been stored for the job.
    async fn load_stream(&self, id: JobId) -> Result<Option<StreamReader>, PersistenceError>;

    /// Remove the record and stream of a job. Missing files are not an error.
    async fn delete_job(&self, id: JobId) -> Result<(), PersistenceError>;

    /// Where the stream for `id` lives on disk, for backends that have one.
    fn stream_path(&self, id: JobId) -> Option<PathBuf>;
}
