use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{MessageResponse, SavingResponse, ToggleResponse};
use crate::routes::error::ApiError;

/// POST /start-saving
pub async fn start_saving(State(state): State<AppState>) -> Json<MessageResponse> {
    state.toggle.set_saving(true);
    tracing::info!("Saving enabled");
    Json(MessageResponse {
        message: "Saving started".to_string(),
    })
}

/// POST /stop-saving
pub async fn stop_saving(State(state): State<AppState>) -> Json<MessageResponse> {
    state.toggle.set_saving(false);
    tracing::info!("Saving disabled");
    Json(MessageResponse {
        message: "Saving stopped".to_string(),
    })
}

/// POST /toggle-saving
pub async fn toggle_saving(State(state): State<AppState>) -> Json<ToggleResponse> {
    let saving = state.toggle.toggle();
    tracing::info!(saving, "Saving toggled");
    let message = if saving { "Saving started" } else { "Saving stopped" };
    Json(ToggleResponse {
        message: message.to_string(),
        saving,
    })
}

/// GET /is-saving
pub async fn is_saving(State(state): State<AppState>) -> Json<SavingResponse> {
    Json(SavingResponse {
        saving: state.toggle.is_saving(),
    })
}

/// GET /footages — Finalized footage, most recent first.
pub async fn list_footage(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.storage.list_footage().await?))
}

/// GET /footages/{name}
pub async fn get_footage(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.storage.read_footage(&name).await?;
    Ok(([(header::CONTENT_TYPE, "video/mp4")], bytes))
}
