use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::services::storage;

/// Outcome of a successful conversion.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// Converts raw segments into distributable files with an external encoder.
///
/// The argument set is fixed: `-y -loglevel error -i <raw> -vcodec <codec>
/// -crf <crf> -pix_fmt yuv420p <output>`. The encoder writes to a hidden
/// staging file beside `output`, which is renamed into place only after a
/// zero exit status. The raw input is deleted once the encoder has run,
/// whether it succeeded or its failure has been logged.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    leading_args: Vec<OsString>,
    codec: String,
    crf: u8,
}

impl Transcoder {
    pub fn new(program: impl Into<PathBuf>, codec: impl Into<String>, crf: u8) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            codec: codec.into(),
            crf,
        }
    }

    /// Arguments placed before the transcode arguments, for running the
    /// encoder through a wrapper such as `nice -n 10 ffmpeg`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The full argument vector for one conversion.
    pub fn args(&self, raw: &Path, output: &Path) -> Vec<OsString> {
        let mut args = self.leading_args.clone();
        args.extend(["-y", "-loglevel", "error", "-i"].map(OsString::from));
        args.push(raw.as_os_str().to_owned());
        args.push("-vcodec".into());
        args.push(self.codec.clone().into());
        args.push("-crf".into());
        args.push(self.crf.to_string().into());
        args.push("-pix_fmt".into());
        args.push("yuv420p".into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Convert `raw` into `output`, then delete `raw`.
    pub async fn convert(&self, raw: &Path, output: &Path) -> Result<TranscodeOutput, TranscodeError> {
        let start = Instant::now();
        let result = self.run(raw, output).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(()) => {
                metrics::histogram!("transcode_seconds").record(elapsed.as_secs_f64());
                tracing::info!(
                    raw = %raw.display(),
                    output = %output.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Transcode complete"
                );
            }
            Err(e) => {
                metrics::counter!("transcode_failures_total").increment(1);
                tracing::error!(
                    raw = %raw.display(),
                    output = %output.display(),
                    error = %e,
                    "Transcode failed"
                );
                storage::remove_file_best_effort(&staging_path(output)).await;
            }
        }

        storage::remove_file_best_effort(raw).await;
        result.map(|()| TranscodeOutput {
            output_path: output.to_path_buf(),
            elapsed,
        })
    }

    async fn run(&self, raw: &Path, output: &Path) -> Result<(), TranscodeError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TranscodeError::Launch {
                    program: self.program.clone(),
                    source,
                })?;
        }

        let staging = staging_path(output);
        let result = Command::new(&self.program)
            .args(self.args(raw, &staging))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TranscodeError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(TranscodeError::Failed {
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        tokio::fs::rename(&staging, output)
            .await
            .map_err(|source| TranscodeError::Finalize {
                path: output.to_path_buf(),
                source,
            })
    }

    /// Run a conversion on its own task so the caller never waits on the encoder.
    pub fn dispatch(
        self: &Arc<Self>,
        raw: PathBuf,
        output: PathBuf,
    ) -> JoinHandle<Result<TranscodeOutput, TranscodeError>> {
        let transcoder = Arc::clone(self);
        tokio::spawn(async move { transcoder.convert(&raw, &output).await })
    }

    /// Whether the encoder can be launched at all (for health checks).
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .args(&self.leading_args)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Where the encoder writes before its output is moved into place.
///
/// The leading dot keeps unfinished files out of footage listings; the
/// extension is kept so the encoder still infers the container.
pub fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".partial-{}", name))
}

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Failed to launch {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder exited with status {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Failed { code: Option<i32>, stderr: String },

    #[error("Failed to move output into {}: {source}", .path.display())]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
