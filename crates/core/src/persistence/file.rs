// crates/core/src/persistence/file.rs
//! Directory-backed persistence: `<job_dir>/<id>.json` plus `<job_dir>/<id>.bin`.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sensorhub_types::{ArtifactStream, Job, JobId};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::{JobPersistence, StreamReader};
use crate::error::PersistenceError;
use crate::paths;

/// Read buffer size used when copying result streams to disk.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const WRITE_CHECK: &str = ".write-check";

/// Stores each job as a pretty-printed JSON record next to its result stream.
///
/// Every write goes to its own uniquely named `.part` file in the job
/// directory and is renamed into place, so readers and restarts only ever see
/// complete files and concurrent writers never share a scratch file. A
/// cancelled write removes its `.part` file; ones left by a crash are removed
/// by `load_all`.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    job_dir: PathBuf,
}

impl FilePersistence {
    pub fn new(job_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_dir: job_dir.into(),
        }
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    /// Fresh scratch file for `path`, e.g. `1001.json.Xa81Qz.part`.
    fn partial_for(&self, path: &Path) -> Result<NamedTempFile, PersistenceError> {
        tempfile::Builder::new()
            .prefix(&paths::partial_prefix(path))
            .suffix(paths::PARTIAL_SUFFIX)
            .tempfile_in(&self.job_dir)
            .map_err(|e| PersistenceError::io(&self.job_dir, e))
    }

    async fn write_atomic(&self, path: PathBuf, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let mut partial = self.partial_for(&path)?;
        tokio::task::spawn_blocking(move || -> Result<(), PersistenceError> {
            partial
                .write_all(&bytes)
                .and_then(|()| partial.as_file().sync_all())
                .map_err(|e| PersistenceError::io(partial.path(), e))?;
            partial
                .persist(&path)
                .map_err(|e| PersistenceError::io(&path, e.error))?;
            Ok(())
        })
        .await
        .map_err(|_| PersistenceError::Shutdown)?
    }

    async fn copy_stream(
        file: &mut tokio::fs::File,
        partial: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ArtifactStream, PersistenceError> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        let mut size_bytes = 0u64;

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| PersistenceError::io(partial, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])
                .await
                .map_err(|e| PersistenceError::io(partial, e))?;
            size_bytes += n as u64;
        }

        file.flush()
            .await
            .map_err(|e| PersistenceError::io(partial, e))?;
        file.sync_all()
            .await
            .map_err(|e| PersistenceError::io(partial, e))?;

        Ok(ArtifactStream {
            size_bytes,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), PersistenceError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

#[async_trait]
impl JobPersistence for FilePersistence {
    async fn prepare(&self) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.job_dir)
            .await
            .map_err(|e| PersistenceError::io(&self.job_dir, e))?;

        // Surface an unwritable directory now rather than on the first job.
        let check = self.job_dir.join(WRITE_CHECK);
        tokio::fs::write(&check, b"")
            .await
            .map_err(|e| PersistenceError::io(&check, e))?;
        remove_if_exists(&check).await
    }

    async fn save_job(&self, job: &Job) -> Result<(), PersistenceError> {
        let path = paths::job_record_path(&self.job_dir, job.id);
        let bytes = serde_json::to_vec_pretty(job).map_err(|source| PersistenceError::Serialize {
            path: path.clone(),
            source,
        })?;
        self.write_atomic(path, bytes).await
    }

    async fn load_all(&self) -> Result<Vec<Job>, PersistenceError> {
        let mut entries = tokio::fs::read_dir(&self.job_dir)
            .await
            .map_err(|e| PersistenceError::io(&self.job_dir, e))?;
        let mut jobs = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.job_dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "part") {
                tracing::debug!(path = %path.display(), "Removing interrupted write");
                remove_if_exists(&path).await?;
                continue;
            }
            let Some(id) = paths::job_id_from_record(&path) else {
                continue;
            };

            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| PersistenceError::io(&path, e))?;
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) if job.id == id => jobs.push(job),
                Ok(job) => tracing::warn!(
                    path = %path.display(),
                    record_id = job.id,
                    "Skipping job record whose id does not match its file name"
                ),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable job record"
                ),
            }
        }

        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn save_stream(
        &self,
        id: JobId,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ArtifactStream, PersistenceError> {
        let path = paths::stream_path(&self.job_dir, id);
        let (file, partial) = self.partial_for(&path)?.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        // `partial` deletes the scratch file if it is dropped before `persist`,
        // including when this future is cancelled mid-upload.
        let artifact = Self::copy_stream(&mut file, &partial, reader).await?;
        drop(file);

        partial
            .persist(&path)
            .map_err(|e| PersistenceError::io(&path, e.error))?;
        tracing::debug!(job_id = id, size_bytes = artifact.size_bytes, "Stored result stream");
        Ok(artifact)
    }

    async fn load_stream(&self, id: JobId) -> Result<Option<StreamReader>, PersistenceError> {
        let path = paths::stream_path(&self.job_dir, id);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(&path, e)),
        }
    }

    async fn delete_job(&self, id: JobId) -> Result<(), PersistenceError> {
        remove_if_exists(&paths::job_record_path(&self.job_dir, id)).await?;
        remove_if_exists(&paths::stream_path(&self.job_dir, id)).await
    }

    fn stream_path(&self, id: JobId) -> Option<PathBuf> {
        Some(paths::stream_path(&self.job_dir, id))
    }
}
