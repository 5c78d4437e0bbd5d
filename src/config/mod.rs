use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::detection::VideoGeometry;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Root of the uploads/predict/processed/footages layout.
    #[serde(default = "default_data_dir")]
    #[garde(skip)]
    pub data_dir: PathBuf,

    /// Upload size ceiling in bytes.
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: u64,

    /// The one container extension accepted for uploads, without the dot.
    #[serde(default = "default_allowed_extension")]
    #[garde(length(min = 1), ascii)]
    pub allowed_extension: String,

    /// Jobs that may wait for a worker before submissions are refused.
    #[serde(default = "default_queue_capacity")]
    #[garde(range(min = 1))]
    pub queue_capacity: usize,

    /// Upload workers allowed to run at once.
    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1))]
    pub worker_concurrency: usize,

    /// Seconds a delivered job and its artifact survive before deletion.
    #[serde(default = "default_job_grace_secs")]
    #[garde(skip)]
    pub job_grace_secs: u64,

    /// Seconds before a completed job's intermediate detector output is deleted.
    #[serde(default = "default_intermediate_ttl_secs")]
    #[garde(skip)]
    pub intermediate_ttl_secs: u64,

    #[serde(default = "default_ffmpeg_path")]
    #[garde(skip)]
    pub ffmpeg_path: PathBuf,

    #[serde(default = "default_ffprobe_path")]
    #[garde(skip)]
    pub ffprobe_path: PathBuf,

    /// Video codec passed to the transcoder (`-vcodec`).
    #[serde(default = "default_transcode_codec")]
    #[garde(length(min = 1))]
    pub transcode_codec: String,

    /// Constant rate factor passed to the transcoder (`-crf`).
    #[serde(default = "default_transcode_crf")]
    #[garde(range(max = 51))]
    pub transcode_crf: u8,

    /// Object detection service endpoint.
    #[serde(default = "default_detector_url")]
    #[garde(length(min = 1))]
    pub detector_url: String,

    /// Optional bearer token for the detection service.
    #[serde(default)]
    #[garde(skip)]
    pub detector_token: Option<String>,

    /// Minimum confidence requested from the detector.
    #[serde(default = "default_detection_confidence")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub detection_confidence: f32,

    /// Label that triggers live recording.
    #[serde(default = "default_watched_label")]
    #[garde(length(min = 1))]
    pub watched_label: String,

    /// Camera or network stream; the live path is disabled when unset.
    #[serde(default)]
    #[garde(skip)]
    pub stream_url: Option<String>,

    /// Only every Nth captured frame is evaluated.
    #[serde(default = "default_frame_stride")]
    #[garde(range(min = 1))]
    pub frame_stride: u32,

    /// Consecutive label-absent sampled frames that end a recording.
    #[serde(default = "default_absence_threshold")]
    #[garde(range(min = 1))]
    pub absence_threshold: u32,

    #[serde(default = "default_record_fps")]
    #[garde(range(min = 0.1))]
    pub record_fps: f64,

    #[serde(default = "default_frame_width")]
    #[garde(range(min = 1))]
    pub frame_width: u32,

    #[serde(default = "default_frame_height")]
    #[garde(range(min = 1))]
    pub frame_height: u32,

    /// Initial value of the saving flag.
    #[serde(default)]
    #[garde(skip)]
    pub saving_enabled: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_upload_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_allowed_extension() -> String {
    "mp4".to_string()
}

fn default_queue_capacity() -> usize {
    32
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_job_grace_secs() -> u64 {
    60
}

fn default_intermediate_ttl_secs() -> u64 {
    300
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_transcode_codec() -> String {
    "libx264".to_string()
}

fn default_transcode_crf() -> u8 {
    23
}

fn default_detector_url() -> String {
    "http://127.0.0.1:8000/detect".to_string()
}

fn default_detection_confidence() -> f32 {
    0.25
}

fn default_watched_label() -> String {
    "person".to_string()
}

fn default_frame_stride() -> u32 {
    2
}

fn default_absence_threshold() -> u32 {
    10
}

fn default_record_fps() -> f64 {
    10.0
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs (upper-case env names).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: AppConfig = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn job_grace(&self) -> Duration {
        Duration::from_secs(self.job_grace_secs)
    }

    pub fn intermediate_ttl(&self) -> Duration {
        Duration::from_secs(self.intermediate_ttl_secs)
    }

    /// Geometry every live frame is scaled to and every footage segment is written at.
    pub fn live_geometry(&self) -> VideoGeometry {
        VideoGeometry {
            width: self.frame_width,
            height: self.frame_height,
            fps: self.record_fps,
        }
    }

    /// Transport-level body ceiling: the upload ceiling plus multipart framing slack.
    pub fn request_body_limit(&self) -> usize {
        let slack = 1024 * 1024;
        usize::try_from(self.max_upload_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(slack)
    }
}
