use std::io;
use std::path::{Path, PathBuf};

use crate::models::job::JobId;

/// Extension of finalized, distributable footage and job outputs.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Extension of raw segments written by the segment writer.
pub const RAW_EXTENSION: &str = "avi";

/// On-disk layout: uploads, detector output, transcoded output and footage.
///
/// Every path below is namespaced by a job id or a capture timestamp and is
/// never reused.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create every area of the layout.
    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [
            self.uploads_dir(),
            self.predict_root(),
            self.processed_dir(),
            self.footage_dir(),
            self.raw_segment_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn predict_root(&self) -> PathBuf {
        self.root.join("predict")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn footage_dir(&self) -> PathBuf {
        self.root.join("footages")
    }

    pub fn raw_segment_dir(&self) -> PathBuf {
        self.footage_dir().join("raw")
    }

    /// Where a submission's bytes are stored.
    pub fn upload_path(&self, id: &JobId, extension: &str) -> PathBuf {
        self.uploads_dir().join(format!("{}.{}", id, extension))
    }

    /// Per-job directory for raw detector output.
    pub fn predict_dir(&self, id: &JobId) -> PathBuf {
        self.predict_root().join(id.to_string())
    }

    /// Final transcoded output of a job.
    pub fn processed_path(&self, id: &JobId) -> PathBuf {
        self.processed_dir()
            .join(format!("{}.{}", id, OUTPUT_EXTENSION))
    }

    /// Finalized footage names, most recent first.
    pub async fn list_footage(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.footage_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::Io { path: dir, source }),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            if !has_extension(&path, OUTPUT_EXTENSION) {
                continue;
            }
            // Dotfiles are encoder output still being written.
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        // Names are capture timestamps, so lexical order is chronological.
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Resolve a footage name to its path, refusing anything outside the footage area.
    pub fn footage_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && has_extension(Path::new(name), OUTPUT_EXTENSION);
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.footage_dir().join(name))
    }

    /// Read a finalized footage file.
    pub async fn read_footage(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.footage_path(name)?;
        read_file(&path).await
    }
}

/// Read a whole file, reporting a missing file as `NotFound`.
pub async fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    tokio::fs::read(path).await.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_path_buf())
        } else {
            StorageError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// First file in `dir` carrying `extension`, in name order.
pub async fn locate_artifact(dir: &Path, extension: &str) -> Result<Option<PathBuf>, StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?
    {
        let path = entry.path();
        if has_extension(&path, extension) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

/// Delete a file, treating an already-missing file as success.
///
/// Failures are logged and swallowed.
pub async fn remove_file_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

/// Recursively delete a directory, treating an already-missing one as success.
pub async fn remove_dir_best_effort(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove directory"),
    }
}

/// Delete a file or directory tree, whichever `path` currently is.
pub async fn remove_path_best_effort(path: &Path) {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => remove_dir_best_effort(path).await,
        Ok(_) => remove_file_best_effort(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to inspect path for removal"),
    }
}

/// Case-insensitive extension check.
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
