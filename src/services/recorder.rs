//! Live recording controller.
//!
//! Watches per-frame detection outcomes and decides, with debounced
//! hysteresis, when a footage segment is opened and closed:
//!
//! - **Idle → Recording** the moment the watched label is present and saving
//!   is enabled.
//! - **Recording** keeps writing every frame. A frame with the label resets
//!   the absence counter; a frame without it (or with saving disabled)
//!   increments it.
//! - When the counter reaches the threshold the segment is closed, without
//!   the threshold frame, and handed to a [`SegmentSink`] for transcoding.
//!
//! The controller is driven sequentially by the frame loop and owns at most
//! one open writer.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::models::detection::{Frame, VideoGeometry};
use crate::services::storage::{OUTPUT_EXTENSION, RAW_EXTENSION};
use crate::services::transcoder::Transcoder;
use crate::services::video::{MediaBackend, VideoError, VideoWriter};

/// A segment whose writer has been closed, ready for transcoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedSegment {
    pub raw_path: PathBuf,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub frames: u64,
}

/// Receives closed segments. Must not block the caller.
pub trait SegmentSink: Send + Sync {
    fn segment_closed(&self, segment: ClosedSegment);
}

/// Sends closed segments to the transcoder on the async runtime.
pub struct TranscodeDispatcher {
    transcoder: Arc<Transcoder>,
    runtime: Handle,
}

impl TranscodeDispatcher {
    pub fn new(transcoder: Arc<Transcoder>, runtime: Handle) -> Self {
        Self {
            transcoder,
            runtime,
        }
    }
}

impl SegmentSink for TranscodeDispatcher {
    fn segment_closed(&self, segment: ClosedSegment) {
        let _entered = self.runtime.enter();
        let conversion = self
            .transcoder
            .dispatch(segment.raw_path, segment.output_path);
        self.runtime.spawn(async move {
            // Failures are logged by the transcoder, which also drops the raw file.
            if let Ok(Ok(_)) = conversion.await {
                metrics::counter!("recording_segments_total").increment(1);
            }
        });
    }
}

/// Fixed parameters of the controller.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Directory for finalized footage.
    pub footage_dir: PathBuf,
    /// Directory for raw segments awaiting transcoding.
    pub raw_dir: PathBuf,
    pub geometry: VideoGeometry,
    /// Consecutive absent sampled frames that end a segment.
    pub absence_threshold: u32,
}

/// The one open segment.
struct RecordingSession {
    started_at: DateTime<Utc>,
    raw_path: PathBuf,
    output_path: PathBuf,
    writer: Box<dyn VideoWriter>,
    frames: u64,
}

impl RecordingSession {
    fn close(self) -> ClosedSegment {
        if let Err(e) = self.writer.finish() {
            tracing::warn!(path = %self.raw_path.display(), error = %e, "Segment writer did not finish cleanly");
        }
        ClosedSegment {
            raw_path: self.raw_path,
            output_path: self.output_path,
            started_at: self.started_at,
            frames: self.frames,
        }
    }
}

/// What processing one frame did to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Still Idle.
    Idle,
    /// Opened a segment; the frame is its first.
    Started { raw_path: PathBuf },
    /// Still recording; `absent` consecutive absent frames so far.
    Recording { absent: u32 },
    /// Closed a segment and handed it to the sink.
    Stopped { raw_path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Failed to open segment {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: VideoError,
    },
}

pub struct RecordingController {
    settings: RecorderSettings,
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn SegmentSink>,
    session: Option<RecordingSession>,
    absent_frames: u32,
}

impl RecordingController {
    pub fn new(
        settings: RecorderSettings,
        backend: Arc<dyn MediaBackend>,
        sink: Arc<dyn SegmentSink>,
    ) -> Self {
        Self {
            settings,
            backend,
            sink,
            session: None,
            absent_frames: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Evaluate one sampled frame.
    pub fn process(
        &mut self,
        frame: &Frame,
        label_present: bool,
        saving_enabled: bool,
    ) -> Result<Transition, RecorderError> {
        let triggered = label_present && saving_enabled;

        let Some(session) = self.session.as_mut() else {
            if !triggered {
                return Ok(Transition::Idle);
            }
            return self.open(frame, Utc::now());
        };

        if triggered {
            self.absent_frames = 0;
        } else {
            self.absent_frames += 1;
            if self.absent_frames >= self.settings.absence_threshold {
                return Ok(self.close());
            }
        }

        if let Err(e) = session.writer.write_frame(frame) {
            tracing::error!(path = %session.raw_path.display(), error = %e, "Segment write failed, closing segment");
            return Ok(self.close());
        }
        session.frames += 1;
        Ok(Transition::Recording {
            absent: self.absent_frames,
        })
    }

    /// Close any open segment, e.g. when the frame source ends.
    pub fn shutdown(&mut self) -> Option<PathBuf> {
        if self.session.is_none() {
            return None;
        }
        match self.close() {
            Transition::Stopped { raw_path } => Some(raw_path),
            _ => None,
        }
    }

    fn open(&mut self, frame: &Frame, now: DateTime<Utc>) -> Result<Transition, RecorderError> {
        let stem = unique_stem(
            &self.settings.raw_dir,
            &self.settings.footage_dir,
            &segment_stem(now),
        );
        let raw_path = self
            .settings
            .raw_dir
            .join(format!("{}.{}", stem, RAW_EXTENSION));
        let output_path = self
            .settings
            .footage_dir
            .join(format!("{}.{}", stem, OUTPUT_EXTENSION));

        let mut writer = self
            .backend
            .open_writer(&raw_path, self.settings.geometry)
            .map_err(|source| RecorderError::Open {
                path: raw_path.clone(),
                source,
            })?;

        let mut frames = 0;
        match writer.write_frame(frame) {
            Ok(()) => frames += 1,
            Err(e) => tracing::warn!(path = %raw_path.display(), error = %e, "Failed to write first frame"),
        }

        tracing::info!(path = %raw_path.display(), "Started recording");
        self.absent_frames = 0;
        self.session = Some(RecordingSession {
            started_at: now,
            raw_path: raw_path.clone(),
            output_path,
            writer,
            frames,
        });
        Ok(Transition::Started { raw_path })
    }

    fn close(&mut self) -> Transition {
        self.absent_frames = 0;
        let Some(session) = self.session.take() else {
            return Transition::Idle;
        };
        let segment = session.close();
        tracing::info!(
            path = %segment.raw_path.display(),
            frames = segment.frames,
            "Stopped recording"
        );
        let raw_path = segment.raw_path.clone();
        self.sink.segment_closed(segment);
        Transition::Stopped { raw_path }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sortable, timestamp-derived segment name. UTC never repeats an hour, so
/// lexical order stays chronological across clock changes.
pub fn segment_stem(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// `base`, or `base-N`, whichever is free as both a raw segment and a
/// finalized footage name.
fn unique_stem(raw_dir: &Path, footage_dir: &Path, base: &str) -> String {
    let taken = |stem: &str| {
        raw_dir.join(format!("{}.{}", stem, RAW_EXTENSION)).exists()
            || footage_dir
                .join(format!("{}.{}", stem, OUTPUT_EXTENSION))
                .exists()
    };
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}-{}", base, n))
        .find(|stem| !taken(stem))
        .unwrap_or_else(|| base.to_string())
}
