use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub storage: ComponentHealth,
    pub encoder: ComponentHealth,
    pub live: ComponentHealth,
    pub jobs_registered: usize,
    pub saving: bool,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_check(ok: bool, started: std::time::Instant) -> Self {
        if ok {
            Self {
                status: "ok".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            }
        } else {
            Self {
                status: "error".to_string(),
                latency_ms: None,
            }
        }
    }
}

/// GET /health — component health with dependency status.
///
/// The live path being down does not degrade the service; uploads keep working.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Check the data layout is in place
    let storage_start = std::time::Instant::now();
    let mut storage_ok = true;
    for dir in [
        state.storage.uploads_dir(),
        state.storage.predict_root(),
        state.storage.processed_dir(),
        state.storage.footage_dir(),
    ] {
        storage_ok &= tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
    }
    let storage_check = ComponentHealth::from_check(storage_ok, storage_start);

    // Check the encoder can be launched
    let encoder_start = std::time::Instant::now();
    let encoder_check =
        ComponentHealth::from_check(state.transcoder.is_available().await, encoder_start);

    let live_check = ComponentHealth {
        status: if state.toggle.is_live_available() {
            "ok".to_string()
        } else {
            "unavailable".to_string()
        },
        latency_ms: None,
    };

    let all_healthy = storage_check.status == "ok" && encoder_check.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            storage: storage_check,
            encoder: encoder_check,
            live: live_check,
            jobs_registered: state.registry.len(),
            saving: state.toggle.is_saving(),
        },
    };

    (status_code, Json(response))
}
