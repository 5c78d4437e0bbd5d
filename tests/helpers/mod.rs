//! Test helper utilities: in-memory media and detection fakes, request
//! builders and an in-process application.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use image::Rgb;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use sentinel_cam::app_state::{AppState, BackgroundTasks};
use sentinel_cam::config::AppConfig;
use sentinel_cam::models::detection::{BoundingBox, Detection, Frame, VideoGeometry};
use sentinel_cam::routes;
use sentinel_cam::services::detector::{DetectError, Detector};
use sentinel_cam::services::transcoder::Transcoder;
use sentinel_cam::services::video::{FrameSource, MediaBackend, VideoError, VideoWriter};

use crate::fixtures::BOUNDARY;

pub const GEOMETRY: VideoGeometry = VideoGeometry {
    width: 8,
    height: 8,
    fps: 10.0,
};

/// Pixel value the fake detector reads as "person in frame".
pub const PRESENT: Rgb<u8> = Rgb([255, 255, 255]);

/// Live stream locations start with this scheme; anything else is an upload.
pub const LIVE_SCHEME: &str = "fake://";

/// A latch that blocks detection until opened.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn opened() -> Self {
        let gate = Self::default();
        gate.open();
        gate
    }

    pub fn closed() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

/// Reports a person wherever the top-left pixel is white.
pub struct FakeDetector {
    pub gate: Gate,
    pub fail: bool,
}

impl FakeDetector {
    pub fn new() -> Self {
        Self {
            gate: Gate::opened(),
            fail: false,
        }
    }

    pub fn gated(gate: Gate) -> Self {
        Self { gate, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            gate: Gate::opened(),
            fail: true,
        }
    }
}

impl Detector for FakeDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        self.gate.wait();
        if self.fail {
            return Err(DetectError::Other("inference backend crashed".to_string()));
        }
        if *frame.get_pixel(0, 0) != PRESENT {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            label: "person".to_string(),
            confidence: 0.91,
            bbox: BoundingBox {
                x1: 1,
                y1: 1,
                x2: 7,
                y2: 7,
            },
        }])
    }
}

struct ScriptedSource {
    frames: VecDeque<Frame>,
}

impl FrameSource for ScriptedSource {
    fn geometry(&self) -> VideoGeometry {
        GEOMETRY
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        Ok(self.frames.pop_front())
    }
}

/// Writes one byte per frame (the top-left red channel) to the segment path
/// when finished.
struct ByteWriter {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl VideoWriter for ByteWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError> {
        self.bytes.push(frame.get_pixel(0, 0)[0]);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), VideoError> {
        std::fs::write(&self.path, &self.bytes)?;
        Ok(())
    }
}

/// In-memory media backend.
///
/// Uploads decode to `upload_frames` white frames; the live stream plays the
/// scripted presence pattern once.
pub struct FakeBackend {
    pub upload_frames: u32,
    live: Mutex<Option<Vec<bool>>>,
}

impl FakeBackend {
    pub fn new(upload_frames: u32) -> Self {
        Self {
            upload_frames,
            live: Mutex::new(None),
        }
    }

    pub fn with_live(upload_frames: u32, presence: &[bool]) -> Self {
        Self {
            upload_frames,
            live: Mutex::new(Some(presence.to_vec())),
        }
    }
}

pub fn frame(present: bool) -> Frame {
    if present {
        Frame::from_pixel(GEOMETRY.width, GEOMETRY.height, PRESENT)
    } else {
        Frame::new(GEOMETRY.width, GEOMETRY.height)
    }
}

impl MediaBackend for FakeBackend {
    fn probe(&self, location: &Path) -> Result<VideoGeometry, VideoError> {
        if !location.exists() {
            return Err(VideoError::Probe(format!("{} missing", location.display())));
        }
        Ok(GEOMETRY)
    }

    fn open_source(
        &self,
        location: &str,
        _geometry: VideoGeometry,
    ) -> Result<Box<dyn FrameSource>, VideoError> {
        let frames: VecDeque<Frame> = if location.starts_with(LIVE_SCHEME) {
            let presence = self.live.lock().unwrap().take().ok_or_else(|| {
                VideoError::Unavailable {
                    location: location.to_string(),
                    reason: "camera not connected".to_string(),
                }
            })?;
            presence.into_iter().map(frame).collect()
        } else {
            (0..self.upload_frames).map(|_| frame(true)).collect()
        };
        Ok(Box::new(ScriptedSource { frames }))
    }

    fn open_writer(
        &self,
        path: &Path,
        _geometry: VideoGeometry,
    ) -> Result<Box<dyn VideoWriter>, VideoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(ByteWriter {
            path: path.to_path_buf(),
            bytes: Vec::new(),
        }))
    }
}

/// Stands in for ffmpeg: copies the file after `-i` to the last argument
/// and answers `-version` successfully.
const COPY_SCRIPT: &str = r#"[ "$1" = "-version" ] && exit 0
in=""; prev=""
for a in "$@"; do
  [ "$prev" = "-i" ] && in="$a"
  prev="$a"
done
cp "$in" "$prev""#;

pub fn shell_transcoder() -> Transcoder {
    Transcoder::new("sh", "libx264", 23).with_leading_args(["-c", COPY_SCRIPT, "transcode"])
}

/// A running application over a temporary data directory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub tasks: BackgroundTasks,
    pub dir: tempfile::TempDir,
}

pub fn test_config(data_dir: &Path, overrides: &[(&str, &str)]) -> AppConfig {
    let mut vars = vec![
        ("DATA_DIR".to_string(), data_dir.display().to_string()),
        ("JOB_GRACE_SECS".to_string(), "1".to_string()),
        ("WORKER_CONCURRENCY".to_string(), "2".to_string()),
    ];
    vars.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    AppConfig::from_vars(vars).expect("test configuration is valid")
}

pub fn spawn_app(
    overrides: &[(&str, &str)],
    backend: FakeBackend,
    detector: FakeDetector,
) -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = test_config(dir.path(), overrides);
    let (state, tasks) = AppState::start(
        &config,
        Arc::new(backend),
        Arc::new(detector),
        shell_transcoder(),
    )
    .expect("data layout");

    let prometheus = Arc::new(PrometheusBuilder::new().build_recorder().handle());
    let router = routes::router(state.clone(), prometheus, config.request_body_limit());
    TestApp {
        router,
        state,
        tasks,
        dir,
    }
}

/// Build a multipart body from `(field, filename, bytes)` parts.
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (field, filename, bytes) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match filename {
            Some(name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                field, name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

pub fn upload_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let (content_type, body) = multipart_body(parts);
    Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }
}

/// Drive one request through the router in-process.
pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

/// Start a streaming request and hand back its body unread.
pub async fn open_stream(
    router: &Router,
    request: Request<Body>,
) -> (StatusCode, HeaderMap, axum::body::BodyDataStream) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    (status, headers, response.into_body().into_data_stream())
}

/// Poll `uri` until it stops answering `status`, or give up after `timeout`.
pub async fn poll_while(
    router: &Router,
    uri: &str,
    status: StatusCode,
    timeout: Duration,
) -> TestResponse {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let response = send(router, get(uri)).await;
        if response.status != status || tokio::time::Instant::now() >= deadline {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Re-check `condition` until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    true
}

pub fn is_job_id(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
