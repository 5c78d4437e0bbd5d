use axum::body::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::services::{
    detector::Detector,
    live::{self, LiveSettings, LiveStats, Previews, RecordingToggle, PREVIEW_BUFFER},
    queue::{self, JobQueue},
    reaper::{ExpiryReaper, ReaperHandle},
    recorder::{RecorderSettings, RecordingController, TranscodeDispatcher},
    registry::JobRegistry,
    storage::{Storage, StorageError},
    transcoder::Transcoder,
    upload::{UploadEngine, UploadLimits},
    video::MediaBackend,
    worker::UploadWorker,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub registry: Arc<JobRegistry>,
    pub engine: Arc<UploadEngine>,
    pub toggle: Arc<RecordingToggle>,
    /// Annotated JPEG frames for `/video`.
    pub preview: broadcast::Sender<Bytes>,
    /// Unannotated JPEG frames for `/live`.
    pub raw_preview: broadcast::Sender<Bytes>,
    pub transcoder: Arc<Transcoder>,
    pub reaper: ReaperHandle,
    /// How long a delivered job outlives its first delivery.
    pub job_grace: Duration,
}

/// Long-running tasks started alongside the state.
pub struct BackgroundTasks {
    pub reaper: JoinHandle<()>,
    pub workers: JoinHandle<()>,
    pub live: Option<JoinHandle<Option<LiveStats>>>,
}

impl AppState {
    /// Create the data layout and start the reaper, the worker pool and,
    /// if a stream is configured, the live capture loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &AppConfig,
        backend: Arc<dyn MediaBackend>,
        detector: Arc<dyn Detector>,
        transcoder: Transcoder,
    ) -> Result<(Self, BackgroundTasks), StorageError> {
        let storage = Arc::new(Storage::new(&config.data_dir));
        storage.ensure_dirs()?;

        let registry = Arc::new(JobRegistry::new());
        let (reaper, reaper_task) = ExpiryReaper::spawn(Arc::clone(&registry));
        let transcoder = Arc::new(transcoder);

        let (job_queue, jobs) = JobQueue::bounded(config.queue_capacity);
        let worker = Arc::new(UploadWorker::new(
            Arc::clone(&storage),
            Arc::clone(&registry),
            Arc::clone(&backend),
            Arc::clone(&detector),
            Arc::clone(&transcoder),
            reaper.clone(),
            config.intermediate_ttl(),
        ));
        let workers = queue::spawn_pool(jobs, config.worker_concurrency, move |id| {
            let worker = Arc::clone(&worker);
            async move { worker.run(id).await }
        });

        let engine = Arc::new(UploadEngine::new(
            Arc::clone(&storage),
            Arc::clone(&registry),
            job_queue,
            UploadLimits {
                allowed_extension: config.allowed_extension.clone(),
                max_bytes: config.max_upload_bytes,
            },
        ));

        let toggle = Arc::new(RecordingToggle::new(config.saving_enabled));
        let (preview, _) = broadcast::channel(PREVIEW_BUFFER);
        let (raw_preview, _) = broadcast::channel(PREVIEW_BUFFER);

        let live = match &config.stream_url {
            Some(stream_url) => {
                let controller = RecordingController::new(
                    RecorderSettings {
                        footage_dir: storage.footage_dir(),
                        raw_dir: storage.raw_segment_dir(),
                        geometry: config.live_geometry(),
                        absence_threshold: config.absence_threshold,
                    },
                    Arc::clone(&backend),
                    Arc::new(TranscodeDispatcher::new(
                        Arc::clone(&transcoder),
                        Handle::current(),
                    )),
                );
                Some(live::start(
                    backend,
                    LiveSettings {
                        stream_url: stream_url.clone(),
                        geometry: config.live_geometry(),
                        frame_stride: config.frame_stride,
                        watched_label: config.watched_label.clone(),
                    },
                    detector,
                    controller,
                    Arc::clone(&toggle),
                    Previews {
                        annotated: preview.clone(),
                        raw: raw_preview.clone(),
                    },
                ))
            }
            None => {
                tracing::info!("No STREAM_URL configured, live capture disabled");
                None
            }
        };

        let state = Self {
            storage,
            registry,
            engine,
            toggle,
            preview,
            raw_preview,
            transcoder,
            reaper,
            job_grace: config.job_grace(),
        };
        let tasks = BackgroundTasks {
            reaper: reaper_task,
            workers,
            live,
        };
        Ok((state, tasks))
    }
}
