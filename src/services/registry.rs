use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::models::job::{Job, JobId, JobState};

/// Concurrency-safe store of upload jobs.
///
/// The map never leaves this type: every operation takes the lock once and
/// either applies its whole update or none of it, so readers always see a
/// consistent `Job` snapshot.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        // Every update is applied in one step, so a poisoned map is still consistent.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new job. Fails if the id is already taken.
    pub fn create(&self, job: Job) -> Result<JobId, RegistryError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        metrics::gauge!("upload_jobs_registered").set(jobs.len() as f64);
        Ok(id)
    }

    /// Snapshot of a job.
    pub fn get(&self, id: &JobId) -> Result<Job, RegistryError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound(*id))
    }

    /// Pending -> Processing.
    pub fn start_processing(&self, id: &JobId) -> Result<Job, RegistryError> {
        self.transition(id, JobState::Processing, |_| {})
    }

    /// Processing -> Completed, recording the deliverable artifact.
    pub fn complete(&self, id: &JobId, artifact: PathBuf) -> Result<Job, RegistryError> {
        self.transition(id, JobState::Completed, |job| {
            job.artifact_path = Some(artifact);
            job.completed_at = Some(Utc::now());
        })
    }

    /// Processing -> Failed, recording the cause.
    pub fn fail(&self, id: &JobId, cause: impl Into<String>) -> Result<Job, RegistryError> {
        let cause = cause.into();
        self.transition(id, JobState::Failed, |job| {
            job.error = Some(cause);
            job.completed_at = Some(Utc::now());
        })
    }

    /// Atomic read-modify-write: checks the move is forward-only, then applies
    /// `update` and the new state together.
    fn transition<F>(&self, id: &JobId, next: JobState, update: F) -> Result<Job, RegistryError>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        if !job.state.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                id: *id,
                from: job.state,
                to: next,
            });
        }
        update(job);
        job.state = next;
        Ok(job.clone())
    }

    /// Claim the one-time "first delivery" event for a settled job.
    ///
    /// Returns `true` for exactly one caller; later callers, and callers
    /// asking about unsettled jobs, get `false`.
    pub fn claim_delivery(&self, id: &JobId) -> Result<bool, RegistryError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        if !job.state.is_terminal() || job.delivered_at.is_some() {
            return Ok(false);
        }
        job.delivered_at = Some(Utc::now());
        Ok(true)
    }

    /// Remove a job that has reached Completed or Failed.
    ///
    /// Unknown ids yield `Ok(None)`, so repeated removal is harmless. Jobs
    /// still in flight are left in place.
    pub fn remove_settled(&self, id: &JobId) -> Result<Option<Job>, RegistryError> {
        let mut jobs = self.lock();
        match jobs.get(id) {
            None => Ok(None),
            Some(job) if !job.state.is_terminal() => Err(RegistryError::Unsettled {
                id: *id,
                state: job.state,
            }),
            Some(_) => {
                let removed = jobs.remove(id);
                metrics::gauge!("upload_jobs_registered").set(jobs.len() as f64);
                Ok(removed)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {id} is still {state}")]
    Unsettled { id: JobId, state: JobState },
}
