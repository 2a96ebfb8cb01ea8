//! Data flowing between pipeline stages, and what a run hands back.

use crate::error::{FetchError, PageError, PipelineError};
use crate::workarea::{RunId, WorkingArea};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An image link discovered on the page.
///
/// `origin_index` is the link's position in page order and fixes its page
/// position in the document, whatever order the downloads complete in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    pub origin_index: usize,
}

/// A downloaded, validated image sitting in the run's working area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedImage {
    pub origin_index: usize,
    pub url: String,
    /// Body as written to the working area.
    pub path: PathBuf,
    /// `Content-Type` header, or the MIME type of the sniffed format.
    pub content_type: String,
    pub byte_len: u64,
    /// Pixel dimensions found while validating.
    pub width: u32,
    pub height: u32,
}

/// Result of fetching one [`ImageReference`]; exactly one per reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FetchOutcome {
    Success(FetchedImage),
    Failure {
        origin_index: usize,
        url: String,
        reason: FetchError,
    },
}

impl FetchOutcome {
    pub fn origin_index(&self) -> usize {
        match self {
            FetchOutcome::Success(img) => img.origin_index,
            FetchOutcome::Failure { origin_index, .. } => *origin_index,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchOutcome::Success(img) => &img.url,
            FetchOutcome::Failure { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

/// Geometry and provenance of one page in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-indexed page number.
    pub page_num: usize,
    pub origin_index: usize,
    pub url: String,
    /// Page size in points.
    pub width: f32,
    pub height: f32,
    /// Size the image was drawn at, in points. Zero for placeholders.
    pub image_width: f32,
    pub image_height: f32,
    /// The image was converted to 8-bit RGB before it would render.
    pub converted: bool,
    /// Blank page standing in for an image that would not render.
    pub placeholder: bool,
}

/// A per-image failure as reported in the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub origin_index: usize,
    pub url: String,
    pub reason: String,
}

/// Counts describing a run; available on success and on fatal failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Option<RunId>,
    pub page_url: String,
    /// Image count the caller asked for (after clamping, if enabled).
    pub requested: usize,
    /// Links on the page after filtering and de-duplication.
    pub links_found: usize,
    /// Links actually handed to the fetcher: `min(requested, links_found)`.
    pub dispatched: usize,
    pub downloaded: usize,
    pub failed: usize,
    /// Pages in the finished document.
    pub pages: usize,
    /// Downloaded images left out because they would not render.
    pub skipped_pages: usize,
    /// Placeholder pages inserted for images that would not render.
    pub placeholder_pages: usize,
    pub failures: Vec<FailureReport>,
    pub page_errors: Vec<PageError>,
    pub total_duration_ms: u64,
    pub download_duration_ms: u64,
    pub paginate_duration_ms: u64,
}

/// The finished PDF, living in the run's working area.
///
/// The working area stays alive as long as the `Document` does; dropping it
/// (or calling [`Document::close`]) reclaims the storage. Use
/// [`Document::persist`] to keep a copy.
#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    pages: Vec<PageInfo>,
    byte_len: u64,
    area: WorkingArea,
}

impl Document {
    pub(crate) fn new(path: PathBuf, pages: Vec<PageInfo>, byte_len: u64, area: WorkingArea) -> Self {
        Self {
            path,
            pages,
            byte_len,
            area,
        }
    }

    /// Path of the PDF inside the working area. Valid until the document is dropped.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    pub fn run_id(&self) -> RunId {
        self.area.run_id()
    }

    /// Read the whole PDF into memory.
    pub async fn read_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| PipelineError::storage(format!("reading {}", self.path.display()), e))
    }

    /// Copy the PDF to `dest` and release the working area.
    ///
    /// Uses atomic write (temp file + rename) so `dest` is never left
    /// half-written.
    pub async fn persist(self, dest: impl AsRef<Path>) -> Result<PathBuf, PipelineError> {
        let dest = dest.as_ref().to_path_buf();
        let write_err = |source| PipelineError::OutputWriteFailed {
            path: dest.clone(),
            source,
        };

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = dest.with_extension("pdf.tmp");
        tokio::fs::copy(&self.path, &tmp_path)
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &dest)
            .await
            .map_err(write_err)?;

        self.close();
        Ok(dest)
    }

    /// Release the working area now.
    pub fn close(self) {
        self.area.close();
    }
}

/// What a successful run returns.
#[derive(Debug)]
pub struct RunOutput {
    pub document: Document,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_accessors() {
        let ok = FetchOutcome::Success(FetchedImage {
            origin_index: 2,
            url: "https://h/a.png".into(),
            path: PathBuf::from("/tmp/a"),
            content_type: "image/png".into(),
            byte_len: 10,
            width: 1,
            height: 1,
        });
        let bad = FetchOutcome::Failure {
            origin_index: 3,
            url: "https://h/b.png".into(),
            reason: FetchError::Http { status: 404 },
        };
        assert_eq!(ok.origin_index(), 2);
        assert!(ok.is_success());
        assert_eq!(bad.origin_index(), 3);
        assert_eq!(bad.url(), "https://h/b.png");
        assert!(!bad.is_success());
    }

    #[test]
    fn summary_serialises() {
        let s = RunSummary {
            requested: 3,
            links_found: 10,
            dispatched: 3,
            downloaded: 2,
            failed: 1,
            ..RunSummary::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"links_found\":10"));
    }

    #[tokio::test]
    async fn persist_copies_and_releases_area() {
        let root = tempfile::tempdir().unwrap();
        let area = WorkingArea::create(Some(root.path()), RunId::new()).unwrap();
        let area_path = area.path().to_path_buf();
        let pdf = area.path().join("document.pdf");
        std::fs::write(&pdf, b"%PDF-1.5\n%%EOF").unwrap();

        let doc = Document::new(pdf, Vec::new(), 14, area);
        assert_eq!(doc.read_bytes().await.unwrap().len(), 14);

        let dest = root.path().join("out/gallery.pdf");
        let written = doc.persist(&dest).await.unwrap();
        assert_eq!(written, dest);
        assert!(dest.exists());
        assert!(!dest.with_extension("pdf.tmp").exists());
        assert!(!area_path.exists());
    }
}
