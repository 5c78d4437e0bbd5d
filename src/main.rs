use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sentinel_cam::app_state::AppState;
use sentinel_cam::config::AppConfig;
use sentinel_cam::routes;
use sentinel_cam::services::{
    detector::HttpDetector, transcoder::Transcoder, video::FfmpegBackend,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing sentinel-cam server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "upload_jobs_submitted_total",
        "Total upload jobs accepted"
    );
    metrics::describe_counter!(
        "upload_jobs_completed_total",
        "Total upload jobs completed"
    );
    metrics::describe_counter!(
        "upload_jobs_failed_total",
        "Total upload jobs that failed"
    );
    metrics::describe_histogram!(
        "upload_job_processing_seconds",
        "Time from job start to completion or failure"
    );
    metrics::describe_gauge!(
        "upload_jobs_registered",
        "Jobs currently held in the registry"
    );
    metrics::describe_gauge!(
        "upload_jobs_in_progress",
        "Upload jobs currently being processed"
    );
    metrics::describe_gauge!(
        "upload_queue_depth",
        "Jobs waiting for a worker"
    );
    metrics::describe_counter!(
        "recording_segments_total",
        "Live footage segments transcoded"
    );
    metrics::describe_counter!(
        "transcode_failures_total",
        "Transcoder runs that failed"
    );
    metrics::describe_histogram!(
        "transcode_seconds",
        "Time spent in the external encoder"
    );

    // Initialize media and detection collaborators
    tracing::info!(
        ffmpeg = %config.ffmpeg_path.display(),
        detector_url = %config.detector_url,
        "Initializing media backend and detector client"
    );
    let backend = Arc::new(FfmpegBackend::new(&config.ffmpeg_path, &config.ffprobe_path));
    let detector = Arc::new(HttpDetector::new(
        config.detector_url.clone(),
        config.detector_token.clone(),
        config.detection_confidence,
    ));
    let transcoder = Transcoder::new(
        &config.ffmpeg_path,
        config.transcode_codec.clone(),
        config.transcode_crf,
    );
    if !transcoder.is_available().await {
        tracing::warn!(program = %transcoder.program().display(), "Encoder not available, transcoding will fail");
    }

    // Start the reaper, worker pool and live capture
    let (state, _tasks) = AppState::start(&config, backend, detector, transcoder)
        .expect("Failed to prepare data directories");

    let app = routes::router(state, prometheus_handle, config.request_body_limit());

    tracing::info!("Starting sentinel-cam on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
