use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::app_state::AppState;
use crate::routes::error::ApiError;
use crate::services::live::RecordingToggle;

const BOUNDARY: &str = "frame";

/// How long a viewer waits for a frame before checking the capture loop is still running.
const LIVENESS_CHECK: Duration = Duration::from_secs(1);

/// GET /video — MJPEG stream of annotated live frames.
pub async fn video_feed(State(state): State<AppState>) -> Result<Response, ApiError> {
    mjpeg_stream(&state.preview, &state.toggle)
}

/// GET /live — MJPEG stream of raw camera frames.
pub async fn live_feed(State(state): State<AppState>) -> Result<Response, ApiError> {
    mjpeg_stream(&state.raw_preview, &state.toggle)
}

/// Stream frames from `channel` until the capture loop stops.
fn mjpeg_stream(
    channel: &broadcast::Sender<Bytes>,
    toggle: &Arc<RecordingToggle>,
) -> Result<Response, ApiError> {
    if !toggle.is_live_available() {
        return Err(ApiError::unavailable("Live stream is not available"));
    }

    let viewer = (channel.subscribe(), Arc::clone(toggle));
    let stream = futures::stream::unfold(viewer, |(mut frames, toggle)| async move {
        loop {
            match tokio::time::timeout(LIVENESS_CHECK, frames.recv()).await {
                Ok(Ok(jpeg)) => {
                    return Some((Ok::<_, Infallible>(mjpeg_part(&jpeg)), (frames, toggle)))
                }
                // Slow viewer: skip to the newest frames.
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => return None,
                Err(_) if toggle.is_live_available() => continue,
                Err(_) => return None,
            }
        }
    });

    Ok((
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// One multipart part wrapping a JPEG image.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY).as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
