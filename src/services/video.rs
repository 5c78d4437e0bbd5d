// ffmpeg-backed frame source and segment writer.
//
// Both sides speak packed rgb24 over a pipe: the source decodes anything
// ffmpeg can open (camera URL, uploaded file) to raw frames on stdout, the
// writer takes raw frames on stdin and muxes them into an MJPEG .avi raw
// segment. Everything here is blocking and runs on blocking threads.

use serde::Deserialize;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;

use crate::models::detection::{Frame, VideoGeometry};

/// A sequential supplier of decoded frames.
pub trait FrameSource: Send {
    fn geometry(&self) -> VideoGeometry;

    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>, VideoError>;
}

/// An open segment file. Must be finished to finalize the container.
pub trait VideoWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError>;

    fn finish(self: Box<Self>) -> Result<(), VideoError>;
}

/// Opens sources and writers; swapped for in-memory fakes in tests.
pub trait MediaBackend: Send + Sync {
    /// Frame size and rate of a stored video.
    fn probe(&self, location: &Path) -> Result<VideoGeometry, VideoError>;

    /// Decode `location`, scaling every frame to `geometry`.
    fn open_source(
        &self,
        location: &str,
        geometry: VideoGeometry,
    ) -> Result<Box<dyn FrameSource>, VideoError>;

    /// Start a raw segment at `path` with fixed geometry.
    fn open_writer(
        &self,
        path: &Path,
        geometry: VideoGeometry,
    ) -> Result<Box<dyn VideoWriter>, VideoError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("Failed to launch {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not open video source {location}: {reason}")]
    Unavailable { location: String, reason: String },

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Frame is {actual_width}x{actual_height}, segment expects {width}x{height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Video pipe error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoder exited with status {code:?}: {stderr}")]
    Encoder { code: Option<i32>, stderr: String },
}

/// `MediaBackend` built on the ffmpeg and ffprobe executables.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Option<Vec<ProbeStream>>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Parse ffprobe's rational frame rate ("30000/1001", "25/1", "25").
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_probe(json: &[u8]) -> Result<VideoGeometry, VideoError> {
    let output: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| VideoError::Probe(format!("unreadable ffprobe output: {}", e)))?;
    let stream = output
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.width.is_some() && s.height.is_some())
        .ok_or_else(|| VideoError::Probe("no video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(VideoError::Probe("video stream has no dimensions".to_string())),
    };
    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| VideoError::Probe("video stream has no frame rate".to_string()))?;

    Ok(VideoGeometry { width, height, fps })
}

/// Arguments decoding `location` to raw rgb24 frames of `geometry` on stdout.
pub fn source_args(location: &str, geometry: VideoGeometry) -> Vec<OsString> {
    [
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        location.to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", geometry.width, geometry.height),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-".to_string(),
    ]
    .into_iter()
    .map(OsString::from)
    .collect()
}

/// Arguments encoding raw rgb24 frames from stdin into an MJPEG segment at `path`.
pub fn writer_args(path: &Path, geometry: VideoGeometry) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", geometry.width, geometry.height),
        "-r".to_string(),
        geometry.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "mjpeg".to_string(),
        "-q:v".to_string(),
        "3".to_string(),
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

impl MediaBackend for FfmpegBackend {
    fn probe(&self, location: &Path) -> Result<VideoGeometry, VideoError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate",
            ])
            .arg(location)
            .output()
            .map_err(|source| VideoError::Launch {
                program: self.ffprobe.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VideoError::Probe(format!(
                "ffprobe failed on {}: {}",
                location.display(),
                stderr.trim()
            )));
        }

        parse_probe(&output.stdout)
    }

    fn open_source(
        &self,
        location: &str,
        geometry: VideoGeometry,
    ) -> Result<Box<dyn FrameSource>, VideoError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(source_args(location, geometry))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| VideoError::Launch {
                program: self.ffmpeg.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| VideoError::Unavailable {
            location: location.to_string(),
            reason: "decoder has no stdout".to_string(),
        })?;

        tracing::debug!(location, width = geometry.width, height = geometry.height, "Opened frame source");
        Ok(Box::new(FfmpegSource {
            child,
            stdout,
            geometry,
        }))
    }

    fn open_writer(
        &self,
        path: &Path,
        geometry: VideoGeometry,
    ) -> Result<Box<dyn VideoWriter>, VideoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut command = Command::new(&self.ffmpeg);
        command.args(writer_args(path, geometry));
        let writer = FfmpegWriter::spawn(command, geometry).map_err(|source| VideoError::Launch {
            program: self.ffmpeg.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "Opened segment writer");
        Ok(Box::new(writer))
    }
}

/// Decoder child process yielding rgb24 frames.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    geometry: VideoGeometry,
}

impl FrameSource for FfmpegSource {
    fn geometry(&self) -> VideoGeometry {
        self.geometry
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        let mut buf = vec![0u8; self.geometry.frame_len()];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        // A truncated trailing frame means the decoder stopped mid-write.
        if filled < buf.len() {
            return Ok(None);
        }
        Ok(Frame::from_raw(self.geometry.width, self.geometry.height, buf))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Encoder child process consuming rgb24 frames.
pub struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<thread::JoinHandle<String>>,
    geometry: VideoGeometry,
}

impl FfmpegWriter {
    /// Start `command` reading frames from stdin. Stderr is drained on its
    /// own thread so a noisy encoder cannot stall frame writes.
    fn spawn(mut command: Command, geometry: VideoGeometry) -> io::Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut output = String::new();
                let _ = pipe.read_to_string(&mut output);
                output
            })
        });
        Ok(Self {
            child,
            stdin,
            stderr,
            geometry,
        })
    }
}

impl VideoWriter for FfmpegWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError> {
        if frame.width() != self.geometry.width || frame.height() != self.geometry.height {
            return Err(VideoError::GeometryMismatch {
                width: self.geometry.width,
                height: self.geometry.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "segment already finished"))?;
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), VideoError> {
        // Closing stdin lets the encoder flush and write the trailer.
        drop(self.stdin.take());
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|drain| drain.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(VideoError::Encoder {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
