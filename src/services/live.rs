//! Live capture loop.
//!
//! Owns the camera stream exclusively. Every `stride`-th frame is sent to the
//! detector, fed to the [`RecordingController`], annotated and published as
//! JPEG for the MJPEG endpoint. Every captured frame is also published
//! unannotated. The loop is blocking and runs on its own blocking thread.

use axum::body::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::detection::{contains_label, Frame, VideoGeometry};
use crate::services::annotate;
use crate::services::detector::Detector;
use crate::services::recorder::RecordingController;
use crate::services::video::{FrameSource, MediaBackend, VideoError};

/// JPEG quality of published preview frames.
const PREVIEW_JPEG_QUALITY: u8 = 80;

/// Preview frames buffered per subscriber before slow viewers skip ahead.
pub const PREVIEW_BUFFER: usize = 4;

/// Shared recording flags, read by the frame loop and set over HTTP.
#[derive(Debug, Default)]
pub struct RecordingToggle {
    saving: AtomicBool,
    live_available: AtomicBool,
}

impl RecordingToggle {
    pub fn new(saving: bool) -> Self {
        Self {
            saving: AtomicBool::new(saving),
            live_available: AtomicBool::new(false),
        }
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    pub fn set_saving(&self, saving: bool) {
        self.saving.store(saving, Ordering::SeqCst);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        !self.saving.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_live_available(&self) -> bool {
        self.live_available.load(Ordering::SeqCst)
    }

    pub fn set_live_available(&self, available: bool) {
        self.live_available.store(available, Ordering::SeqCst);
    }
}

/// Where encoded preview frames are published.
#[derive(Debug, Clone)]
pub struct Previews {
    /// Sampled frames with the watched label drawn.
    pub annotated: broadcast::Sender<Bytes>,
    /// Every captured frame as-is.
    pub raw: broadcast::Sender<Bytes>,
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub stream_url: String,
    pub geometry: VideoGeometry,
    pub frame_stride: u32,
    pub watched_label: String,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiveStats {
    pub captured: u64,
    pub processed: u64,
    pub detect_failures: u64,
}

pub struct LiveLoop {
    source: Box<dyn FrameSource>,
    first_frame: Option<Frame>,
    detector: Arc<dyn Detector>,
    controller: RecordingController,
    toggle: Arc<RecordingToggle>,
    previews: Previews,
    watched_label: String,
    frame_stride: u32,
}

impl LiveLoop {
    /// Open the stream and read its first frame.
    ///
    /// Fails with `VideoError::Unavailable` if the source cannot deliver a frame.
    pub fn open(
        backend: &dyn MediaBackend,
        settings: LiveSettings,
        detector: Arc<dyn Detector>,
        controller: RecordingController,
        toggle: Arc<RecordingToggle>,
        previews: Previews,
    ) -> Result<Self, VideoError> {
        let mut source = backend.open_source(&settings.stream_url, settings.geometry)?;
        let first_frame = source.next_frame()?.ok_or_else(|| VideoError::Unavailable {
            location: settings.stream_url.clone(),
            reason: "stream ended before the first frame".to_string(),
        })?;

        Ok(Self {
            source,
            first_frame: Some(first_frame),
            detector,
            controller,
            toggle,
            previews,
            watched_label: settings.watched_label,
            frame_stride: settings.frame_stride.max(1),
        })
    }

    /// Run on a blocking thread until the stream ends.
    pub fn spawn(self) -> JoinHandle<LiveStats> {
        tokio::task::spawn_blocking(move || self.run())
    }

    pub fn run(mut self) -> LiveStats {
        self.toggle.set_live_available(true);
        let mut stats = LiveStats::default();

        loop {
            let frame = match self.first_frame.take() {
                Some(frame) => frame,
                None => match self.source.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        tracing::info!("Live stream ended");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Live stream read failed");
                        break;
                    }
                },
            };

            stats.captured += 1;
            publish(&self.previews.raw, &frame);
            if (stats.captured - 1) % u64::from(self.frame_stride) != 0 {
                continue;
            }
            stats.processed += 1;

            if !self.process(&frame) {
                stats.detect_failures += 1;
            }
        }

        if let Some(path) = self.controller.shutdown() {
            tracing::info!(path = %path.display(), "Closed open segment at end of stream");
        }
        self.toggle.set_live_available(false);
        stats
    }

    /// Evaluate one sampled frame. Returns false if detection failed.
    fn process(&mut self, frame: &Frame) -> bool {
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(error = %e, "Detection failed, skipping frame");
                publish(&self.previews.annotated, frame);
                return false;
            }
        };

        let present = contains_label(&detections, &self.watched_label);
        if let Err(e) = self
            .controller
            .process(frame, present, self.toggle.is_saving())
        {
            tracing::error!(error = %e, "Could not start recording");
        }

        let annotated = annotate::annotate(frame, &detections, Some(self.watched_label.as_str()));
        publish(&self.previews.annotated, &annotated);
        true
    }
}

/// Encode and send a frame, skipping the work when nobody is watching.
fn publish(channel: &broadcast::Sender<Bytes>, frame: &Frame) {
    if channel.receiver_count() == 0 {
        return;
    }
    match annotate::encode_jpeg(frame, PREVIEW_JPEG_QUALITY) {
        Ok(jpeg) => {
            let _ = channel.send(Bytes::from(jpeg));
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode preview frame"),
    }
}

/// Open the live path and start it, or mark it unavailable.
///
/// A source that cannot be opened only disables live capture; uploads are
/// unaffected.
pub fn start(
    backend: Arc<dyn MediaBackend>,
    settings: LiveSettings,
    detector: Arc<dyn Detector>,
    controller: RecordingController,
    toggle: Arc<RecordingToggle>,
    previews: Previews,
) -> JoinHandle<Option<LiveStats>> {
    tokio::task::spawn_blocking(move || {
        let url = settings.stream_url.clone();
        match LiveLoop::open(
            backend.as_ref(),
            settings,
            detector,
            controller,
            Arc::clone(&toggle),
            previews,
        ) {
            Ok(live) => {
                tracing::info!(stream_url = %url, "Live capture started");
                Some(live.run())
            }
            Err(e) => {
                tracing::error!(stream_url = %url, error = %e, "Live frame source unavailable");
                toggle.set_live_available(false);
                None
            }
        }
    })
}
