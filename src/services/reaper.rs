use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::DelayQueue;

use crate::models::job::JobId;
use crate::services::registry::{JobRegistry, RegistryError};
use crate::services::storage;

/// Something the reaper deletes once its delay elapses.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpiryTarget {
    /// A settled job: its artifact file and its registry entry.
    Job(JobId),
    /// An intermediate file or directory.
    Path(PathBuf),
}

/// Cloneable handle for scheduling deletions on the reaper loop.
#[derive(Debug, Clone)]
pub struct ReaperHandle {
    tx: mpsc::UnboundedSender<(ExpiryTarget, Duration)>,
}

impl ReaperHandle {
    /// Delete a job and its artifact after `delay`.
    pub fn schedule_expiry(&self, id: JobId, delay: Duration) {
        self.schedule(ExpiryTarget::Job(id), delay);
    }

    /// Delete an intermediate path after `delay`.
    pub fn schedule_path(&self, path: PathBuf, delay: Duration) {
        self.schedule(ExpiryTarget::Path(path), delay);
    }

    fn schedule(&self, target: ExpiryTarget, delay: Duration) {
        tracing::debug!(?target, delay_secs = delay.as_secs_f64(), "Scheduling expiry");
        if self.tx.send((target, delay)).is_err() {
            tracing::warn!("Expiry reaper has stopped; deletion not scheduled");
        }
    }
}

/// Delayed deletion of delivered jobs and intermediate artifacts.
///
/// A single loop owns the timer queue; everyone else talks to it through a
/// [`ReaperHandle`]. The loop ends once every handle is dropped and the
/// queue has drained.
pub struct ExpiryReaper {
    registry: Arc<JobRegistry>,
    rx: mpsc::UnboundedReceiver<(ExpiryTarget, Duration)>,
    pending: DelayQueue<ExpiryTarget>,
}

impl ExpiryReaper {
    pub fn new(registry: Arc<JobRegistry>) -> (Self, ReaperHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reaper = Self {
            registry,
            rx,
            pending: DelayQueue::new(),
        };
        (reaper, ReaperHandle { tx })
    }

    /// Start the loop on the runtime.
    pub fn spawn(registry: Arc<JobRegistry>) -> (ReaperHandle, JoinHandle<()>) {
        let (reaper, handle) = Self::new(registry);
        (handle, tokio::spawn(reaper.run()))
    }

    pub async fn run(mut self) {
        let mut accepting = true;
        loop {
            tokio::select! {
                request = self.rx.recv(), if accepting => match request {
                    Some((target, delay)) => {
                        self.pending.insert(target, delay);
                    }
                    None => accepting = false,
                },
                Some(expired) = self.pending.next(), if !self.pending.is_empty() => {
                    expire(&self.registry, expired.into_inner()).await;
                }
                else => break,
            }
        }
        tracing::debug!("Expiry reaper stopped");
    }
}

/// Perform one deletion. Safe to call repeatedly for the same target.
pub async fn expire(registry: &JobRegistry, target: ExpiryTarget) {
    match target {
        ExpiryTarget::Job(id) => match registry.remove_settled(&id) {
            Ok(Some(job)) => {
                if let Some(artifact) = &job.artifact_path {
                    storage::remove_file_best_effort(artifact).await;
                }
                tracing::info!(job_id = %id, state = %job.state, "Expired job");
            }
            Ok(None) => tracing::debug!(job_id = %id, "Job already expired"),
            Err(RegistryError::Unsettled { state, .. }) => {
                tracing::warn!(job_id = %id, %state, "Refusing to expire unsettled job");
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to expire job"),
        },
        ExpiryTarget::Path(path) => {
            storage::remove_path_best_effort(&path).await;
            tracing::debug!(path = %path.display(), "Expired intermediate path");
        }
    }
}
