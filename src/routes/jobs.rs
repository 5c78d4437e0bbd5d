use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{JobStatusResponse, SubmitResponse};
use crate::models::job::{JobId, JobState};
use crate::routes::error::ApiError;
use crate::services::storage;

/// Multipart field carrying the video.
const FILE_FIELD: &str = "file";

/// POST /upload — Submit a video for detection.
///
/// The file is streamed to disk chunk by chunk, so an oversize file is
/// refused as soon as it crosses the ceiling and never held in memory.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let mut upload = state.engine.begin(&filename).await?;
        while let Some(chunk) = field.chunk().await? {
            upload.write_chunk(&chunk).await?;
        }

        let job_id = upload.finish().await?;
        return Ok(Json(SubmitResponse {
            job_id,
            status: JobState::Pending.to_string(),
            message: "File uploaded successfully, processing started".to_string(),
        }));
    }

    Err(ApiError::bad_request("No file part"))
}

/// GET /status/{job_id} — Poll a job.
///
/// Completed jobs answer with the artifact bytes; the first delivery starts
/// the expiry grace period.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id: JobId = job_id
        .parse()
        .map_err(|_| ApiError::not_found("Job not found"))?;
    let job = state.registry.get(&id)?;

    match job.state {
        JobState::Pending | JobState::Processing => Ok((
            StatusCode::ACCEPTED,
            Json(JobStatusResponse {
                job_id: id,
                status: JobState::Processing.to_string(),
                error: None,
            }),
        )
            .into_response()),

        JobState::Completed => {
            let artifact = job
                .artifact_path
                .ok_or_else(|| ApiError::internal("Completed job has no artifact"))?;
            let bytes = storage::read_file(&artifact).await?;
            claim_and_schedule(&state, &id);
            Ok(([(header::CONTENT_TYPE, "video/mp4")], bytes).into_response())
        }

        JobState::Failed => {
            claim_and_schedule(&state, &id);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(JobStatusResponse {
                    job_id: id,
                    status: JobState::Failed.to_string(),
                    error: job.error,
                }),
            )
                .into_response())
        }
    }
}

fn claim_and_schedule(state: &AppState, id: &JobId) {
    match state.registry.claim_delivery(id) {
        Ok(true) => {
            tracing::info!(job_id = %id, grace_secs = state.job_grace.as_secs(), "First delivery, scheduling expiry");
            state.reaper.schedule_expiry(*id, state.job_grace);
        }
        Ok(false) => {}
        Err(e) => tracing::debug!(job_id = %id, error = %e, "Delivery not claimed"),
    }
}
