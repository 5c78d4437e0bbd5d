use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::models::job::{Job, JobId};
use crate::services::queue::{JobQueue, QueueError, QueueSlot};
use crate::services::registry::{JobRegistry, RegistryError};
use crate::services::storage::{self, Storage, StorageError};

/// What a submission must satisfy before anything is allocated for it.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    /// Accepted container extension, without the dot.
    pub allowed_extension: String,
    pub max_bytes: u64,
}

impl UploadLimits {
    /// Reject empty names and disallowed extensions.
    pub fn check_filename(&self, filename: &str) -> Result<(), SubmitError> {
        if filename.trim().is_empty() {
            return Err(SubmitError::InvalidInput("No selected file".to_string()));
        }
        if !storage::has_extension(Path::new(filename), &self.allowed_extension) {
            return Err(SubmitError::InvalidInput(format!(
                "Invalid file type, only .{} files are accepted",
                self.allowed_extension
            )));
        }
        Ok(())
    }

    /// Reject sizes above the ceiling. Usable while a body is still streaming in.
    pub fn check_size(&self, len: u64) -> Result<(), SubmitError> {
        if len > self.max_bytes {
            return Err(SubmitError::InvalidInput(format!(
                "File exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

/// Accepts submissions and hands them to the worker pool.
pub struct UploadEngine {
    storage: Arc<Storage>,
    registry: Arc<JobRegistry>,
    queue: JobQueue,
    limits: UploadLimits,
}

impl UploadEngine {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<JobRegistry>,
        queue: JobQueue,
        limits: UploadLimits,
    ) -> Self {
        Self {
            storage,
            registry,
            queue,
            limits,
        }
    }

    /// Validate, persist and enqueue a submission held in memory.
    ///
    /// Invalid input and a full queue are reported before an id is drawn
    /// or any byte is written.
    pub async fn submit(&self, filename: &str, bytes: &[u8]) -> Result<JobId, SubmitError> {
        self.limits.check_filename(filename)?;
        if bytes.is_empty() {
            return Err(SubmitError::InvalidInput("Uploaded file is empty".to_string()));
        }
        self.limits.check_size(bytes.len() as u64)?;

        let mut upload = self.begin(filename).await?;
        upload.write_chunk(bytes).await?;
        upload.finish().await
    }

    /// Start a submission whose bytes arrive in chunks.
    ///
    /// The filename is checked and a queue slot reserved before an id is
    /// drawn. The upload file is deleted if the returned handle is dropped
    /// without [`PendingUpload::finish`].
    pub async fn begin(&self, filename: &str) -> Result<PendingUpload<'_>, SubmitError> {
        self.limits.check_filename(filename)?;

        let slot = self.queue.try_reserve().map_err(|e| match e {
            QueueError::Full => SubmitError::Busy,
            QueueError::Closed => SubmitError::ShuttingDown,
        })?;

        let id = JobId::generate();
        let path = self
            .storage
            .upload_path(&id, &self.limits.allowed_extension.to_ascii_lowercase());
        let file = create_upload(&path).await?;

        Ok(PendingUpload {
            engine: self,
            slot: Some(slot),
            id,
            path,
            file: Some(file),
            filename: filename.to_string(),
            received: 0,
            finished: false,
        })
    }
}

/// A submission being written to disk. Holds its queue slot until finished.
pub struct PendingUpload<'a> {
    engine: &'a UploadEngine,
    slot: Option<QueueSlot<'a>>,
    id: JobId,
    path: PathBuf,
    file: Option<File>,
    filename: String,
    received: u64,
    finished: bool,
}

impl PendingUpload<'_> {
    /// Append a chunk, refusing it once the total crosses the size ceiling.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SubmitError> {
        self.received += chunk.len() as u64;
        self.engine.limits.check_size(self.received)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk)
                .await
                .map_err(|source| StorageError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Register the job as Pending and enqueue it.
    pub async fn finish(mut self) -> Result<JobId, SubmitError> {
        if self.received == 0 {
            return Err(SubmitError::InvalidInput("Uploaded file is empty".to_string()));
        }
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })?;
        }

        self.engine
            .registry
            .create(Job::pending(self.id, self.path.clone()))?;
        if let Some(slot) = self.slot.take() {
            slot.enqueue(self.id);
        }
        self.finished = true;

        metrics::counter!("upload_jobs_submitted_total").increment(1);
        metrics::gauge!("upload_queue_depth").set(self.engine.queue.depth() as f64);
        tracing::info!(job_id = %self.id, filename = %self.filename, bytes = self.received, "Job submitted");
        Ok(self.id)
    }
}

impl Drop for PendingUpload<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove abandoned upload");
            }
        }
    }
}

async fn create_upload(path: &Path) -> Result<File, StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    File::create(path).await.map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Too many jobs waiting, try again later")]
    Busy,

    #[error("Job queue is shut down")]
    ShuttingDown,

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to register job: {0}")]
    Registry(#[from] RegistryError),
}
