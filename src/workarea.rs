//! Run-scoped working areas.
//!
//! Each run downloads its images into a private temporary directory. The
//! directory name starts with a fresh [`RunId`], never with anything derived
//! from the page URL, so two concurrent runs against the same gallery cannot
//! collide. The directory is removed when the [`WorkingArea`] is closed or
//! dropped on any exit path, including cancellation and panics unwinding
//! through the run. A removal failure is logged and never returned.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

const IMAGES_DIR: &str = "images";

/// Unique token identifying one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex digits, for log lines and file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Isolated per-run storage for downloaded images and the finished document.
pub struct WorkingArea {
    run_id: RunId,
    path: PathBuf,
    /// `None` once the directory has been removed.
    dir: Option<TempDir>,
}

impl WorkingArea {
    /// Create a working area under `root` (or the system temp dir).
    pub fn create(root: Option<&Path>, run_id: RunId) -> Result<Self, PipelineError> {
        let prefix = format!("gallery2pdf-{run_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    PipelineError::storage(format!("creating {}", root.display()), e)
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| PipelineError::storage("creating working area", e))?;

        let images = dir.path().join(IMAGES_DIR);
        std::fs::create_dir(&images)
            .map_err(|e| PipelineError::storage(format!("creating {}", images.display()), e))?;

        debug!("[{}] working area at {}", run_id.short(), dir.path().display());
        Ok(Self {
            run_id,
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the fetcher streams image bodies into.
    pub fn images_dir(&self) -> PathBuf {
        self.path.join(IMAGES_DIR)
    }

    /// Remove downloaded images once they have been paginated.
    ///
    /// Failure is logged, not returned: the document is already built and a
    /// leftover file is reclaimed anyway when the area is dropped.
    pub async fn discard_images(&self) {
        let images = self.images_dir();
        if let Err(e) = tokio::fs::remove_dir_all(&images).await {
            warn!(
                "[{}] could not remove {}: {}",
                self.run_id.short(),
                images.display(),
                e
            );
        }
    }

    /// Remove the working area now. Failure is logged, never returned, so
    /// cleanup cannot mask the run's own result.
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let run = self.run_id.short();
        match dir.close() {
            Ok(()) => debug!("[{}] removed working area {}", run, self.path.display()),
            Err(e) => warn!("[{}] failed to remove {}: {}", run, self.path.display(), e),
        }
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for WorkingArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingArea")
            .field("run_id", &self.run_id)
            .field("path", &self.path)
            .finish()
    }
}
