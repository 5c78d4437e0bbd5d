use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::models::job::JobId;

/// Producer side of the bounded job queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<JobId>,
}

/// A reserved queue slot. Holding one guarantees the enqueue cannot fail
/// for lack of room.
pub struct QueueSlot<'a> {
    permit: mpsc::Permit<'a, JobId>,
}

impl QueueSlot<'_> {
    pub fn enqueue(self, id: JobId) {
        self.permit.send(id);
    }
}

impl JobQueue {
    /// Create a queue holding at most `capacity` waiting jobs.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<JobId>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Reserve room for one job without waiting.
    pub fn try_reserve(&self) -> Result<QueueSlot<'_>, QueueError> {
        self.tx
            .try_reserve()
            .map(|permit| QueueSlot { permit })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(()) => QueueError::Full,
                mpsc::error::TrySendError::Closed(()) => QueueError::Closed,
            })
    }

    /// Jobs waiting for a worker.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Pull job ids off the queue and run `handler` on each, at most
/// `concurrency` at a time. Returns when the queue is closed and drained.
pub fn spawn_pool<F, Fut>(
    mut rx: mpsc::Receiver<JobId>,
    concurrency: usize,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(JobId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Some(id) = rx.recv().await {
            let permit = match Arc::clone(&slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler(id).await;
                drop(permit);
            });
        }
        tracing::debug!("Job queue closed, worker pool stopping");
    })
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueueError {
    #[error("Job queue is full")]
    Full,

    #[error("Job queue is closed")]
    Closed,
}
