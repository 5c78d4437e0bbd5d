use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::job::JobId;
use crate::services::annotate;
use crate::services::detector::{DetectError, Detector};
use crate::services::reaper::ReaperHandle;
use crate::services::registry::JobRegistry;
use crate::services::storage::{self, Storage, StorageError, RAW_EXTENSION};
use crate::services::transcoder::{TranscodeError, Transcoder};
use crate::services::video::{FrameSource, MediaBackend, VideoError, VideoWriter};

/// Runs one submitted job from Processing to Completed or Failed.
pub struct UploadWorker {
    storage: Arc<Storage>,
    registry: Arc<JobRegistry>,
    backend: Arc<dyn MediaBackend>,
    detector: Arc<dyn Detector>,
    transcoder: Arc<Transcoder>,
    reaper: ReaperHandle,
    intermediate_ttl: Duration,
}

impl UploadWorker {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<JobRegistry>,
        backend: Arc<dyn MediaBackend>,
        detector: Arc<dyn Detector>,
        transcoder: Arc<Transcoder>,
        reaper: ReaperHandle,
        intermediate_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            registry,
            backend,
            detector,
            transcoder,
            reaper,
            intermediate_ttl,
        }
    }

    pub async fn run(&self, id: JobId) {
        let start = Instant::now();

        let job = match self.registry.start_processing(&id) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Cannot start job");
                return;
            }
        };
        tracing::info!(job_id = %id, "Processing job");
        metrics::gauge!("upload_jobs_in_progress").increment(1.0);

        let predict_dir = self.storage.predict_dir(&id);
        let outcome = self.process(&id, &job.source_path, &predict_dir).await;
        let elapsed = start.elapsed();

        metrics::gauge!("upload_jobs_in_progress").decrement(1.0);
        metrics::histogram!("upload_job_processing_seconds").record(elapsed.as_secs_f64());

        match outcome {
            Ok(artifact) => match self.registry.complete(&id, artifact.clone()) {
                Ok(_) => {
                    metrics::counter!("upload_jobs_completed_total").increment(1);
                    tracing::info!(
                        job_id = %id,
                        artifact = %artifact.display(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Job completed"
                    );
                    self.reaper.schedule_path(predict_dir, self.intermediate_ttl);
                }
                Err(e) => tracing::error!(job_id = %id, error = %e, "Failed to record completion"),
            },
            Err(e) => {
                metrics::counter!("upload_jobs_failed_total").increment(1);
                tracing::error!(job_id = %id, error = %e, "Job failed");
                if let Err(e) = self.registry.fail(&id, e.to_string()) {
                    tracing::error!(job_id = %id, error = %e, "Failed to record failure");
                }
                storage::remove_dir_best_effort(&predict_dir).await;
            }
        }
    }

    async fn process(
        &self,
        id: &JobId,
        source: &Path,
        predict_dir: &Path,
    ) -> Result<PathBuf, WorkerError> {
        let raw_path = predict_dir.join(format!("{}.{}", id, RAW_EXTENSION));
        let detection = {
            let backend = Arc::clone(&self.backend);
            let detector = Arc::clone(&self.detector);
            let source = source.to_path_buf();
            let raw_path = raw_path.clone();
            tokio::task::spawn_blocking(move || {
                detect_file(backend.as_ref(), detector.as_ref(), &source, &raw_path)
            })
            .await
        };

        // The submission is no longer needed whatever detection did.
        storage::remove_file_best_effort(source).await;

        let frames = detection.map_err(|e| WorkerError::Aborted(e.to_string()))??;
        tracing::debug!(job_id = %id, frames, "Detection pass finished");

        let artifact = storage::locate_artifact(predict_dir, RAW_EXTENSION)
            .await?
            .ok_or_else(|| WorkerError::NoArtifact(predict_dir.to_path_buf()))?;

        let output = self
            .transcoder
            .convert(&artifact, &self.storage.processed_path(id))
            .await?;
        Ok(output.output_path)
    }
}

/// Decode `source`, run detection on every frame, and write the annotated
/// frames to a raw segment at `raw_path`. Returns the frame count.
pub fn detect_file(
    backend: &dyn MediaBackend,
    detector: &dyn Detector,
    source: &Path,
    raw_path: &Path,
) -> Result<u64, WorkerError> {
    let geometry = backend.probe(source)?;
    let mut frames = backend.open_source(&source.to_string_lossy(), geometry)?;
    let mut writer = backend.open_writer(raw_path, geometry)?;

    let copied = copy_annotated(frames.as_mut(), writer.as_mut(), detector);
    let finished = writer.finish();
    let count = copied?;
    finished?;

    if count == 0 {
        return Err(WorkerError::NoFrames);
    }
    Ok(count)
}

fn copy_annotated(
    frames: &mut dyn FrameSource,
    writer: &mut dyn VideoWriter,
    detector: &dyn Detector,
) -> Result<u64, WorkerError> {
    let mut count = 0;
    while let Some(frame) = frames.next_frame()? {
        let detections = detector.detect(&frame)?;
        writer.write_frame(&annotate::annotate(&frame, &detections, None))?;
        count += 1;
    }
    Ok(count)
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Video processing failed: {0}")]
    Video(#[from] VideoError),

    #[error("Detection failed: {0}")]
    Detect(#[from] DetectError),

    #[error("Source video has no frames")]
    NoFrames,

    #[error("No detection output found in {}", .0.display())]
    NoArtifact(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Transcoding failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Detection task aborted: {0}")]
    Aborted(String),
}
