use serde::Serialize;

use crate::models::job::JobId;

/// Response after submitting a video for detection.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: String,
    pub message: String,
}

/// Body returned while a job has no deliverable outcome yet, or failed.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SavingResponse {
    pub saving: bool,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub message: String,
    pub saving: bool,
}
