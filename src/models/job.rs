use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use strum::{AsRefStr, Display};

/// Number of random bytes behind a job id (rendered as 64 hex characters).
const JOB_ID_BYTES: usize = 32;

/// Opaque, collision-resistant identifier handed to clients at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId([u8; JOB_ID_BYTES]);

impl JobId {
    /// Draw a fresh id from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; JOB_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("job id must be {} hex characters", JOB_ID_BYTES * 2)]
pub struct InvalidJobId;

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != JOB_ID_BYTES * 2 || !s.is_ascii() {
            return Err(InvalidJobId);
        }
        let mut bytes = [0u8; JOB_ID_BYTES];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            // chunk is ASCII, so this slice is valid UTF-8
            let pair = std::str::from_utf8(chunk).map_err(|_| InvalidJobId)?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| InvalidJobId)?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidJobId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

/// Lifecycle state of an upload job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Jobs only move forward: Pending -> Processing -> {Completed, Failed}.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

/// An upload-triggered detection job tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub source_path: PathBuf,
    /// Set only once the job is Completed.
    pub artifact_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// First time the outcome was handed to a client.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn pending(id: JobId, source_path: PathBuf) -> Self {
        Self {
            id,
            state: JobState::Pending,
            source_path,
            artifact_path: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            delivered_at: None,
        }
    }
}
