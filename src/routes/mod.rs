pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod recording;
pub mod stream;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::predicate::{DefaultPredicate, NotForContentType, Predicate};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Build the full HTTP surface.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>, body_limit: usize) -> Router {
    // MJPEG must reach the viewer frame by frame; video is already compressed.
    let compress_when = DefaultPredicate::new()
        .and(NotForContentType::const_new("multipart/x-mixed-replace"))
        .and(NotForContentType::const_new("video/"));

    Router::new()
        // Upload jobs
        .route("/upload", post(jobs::submit_job))
        .route("/status/{job_id}", get(jobs::job_status))
        // Live recording
        .route("/start-saving", post(recording::start_saving))
        .route("/stop-saving", post(recording::stop_saving))
        .route("/toggle-saving", post(recording::toggle_saving))
        .route("/is-saving", get(recording::is_saving))
        .route("/footages", get(recording::list_footage))
        .route("/footages/{name}", get(recording::get_footage))
        .route("/video", get(stream::video_feed))
        .route("/live", get(stream::live_feed))
        .route("/health", get(health::health_check))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().compress_when(compress_when))
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
