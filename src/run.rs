//! Pipeline orchestrator: one page URL in, one PDF out.
//!
//! A run moves through a fixed sequence of states:
//!
//! ```text
//! Idle → FetchingMarkup → ExtractingLinks → DownloadingImages → Paginating → Done
//!   └──────────────┴───────────────┴─────────────────┴──────────────┴──▶ Failed
//! ```
//!
//! Every run gets a fresh [`RunId`] and its own [`WorkingArea`]. The area
//! lives inside the run future until the run succeeds, at which point it is
//! handed to the returned [`Document`]. On any error, or when the run is
//! cancelled, the future is dropped and the area with it.
//!
//! Every fatal error reached after validation carries a [`RunSummary`] with
//! the counts gathered so far.

use crate::config::{CountPolicy, PipelineConfig};
use crate::error::PipelineError;
use crate::output::{Document, FailureReport, FetchOutcome, RunOutput, RunSummary};
use crate::pipeline::{extract, fetch, markup, paginate};
use crate::progress::{PipelineProgressCallback, ProgressCallback};
use crate::workarea::{RunId, WorkingArea};
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    FetchingMarkup,
    ExtractingLinks,
    DownloadingImages,
    Paginating,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::FetchingMarkup => "fetching page",
            RunState::ExtractingLinks => "extracting links",
            RunState::DownloadingImages => "downloading images",
            RunState::Paginating => "paginating",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Check the page URL and image count before any work is done.
///
/// Returns the effective image count: `requested`, or the ceiling when the
/// config clamps.
pub fn validate_request(
    page_url: &str,
    requested: usize,
    config: &PipelineConfig,
) -> Result<usize, PipelineError> {
    let invalid = |reason: &str| PipelineError::InvalidInput {
        input: page_url.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(page_url.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https pages are supported"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }

    let ceiling = config.max_count;
    if requested == 0 {
        return Err(PipelineError::InvalidCount { requested, ceiling });
    }
    if requested > ceiling {
        return match config.count_policy {
            CountPolicy::Reject => Err(PipelineError::InvalidCount { requested, ceiling }),
            CountPolicy::Clamp => {
                warn!("Requested {} images, clamping to {}", requested, ceiling);
                Ok(ceiling)
            }
        };
    }
    Ok(requested)
}

/// Scrape `page_url`, download up to `requested` of its images and build
/// one PDF from them.
///
/// # Returns
/// `Ok(RunOutput)` as long as at least one page made it into the document,
/// even if other images failed (see `summary.failed`).
///
/// # Errors
/// Only fatal errors: bad input, the page fetch failing, no links on the
/// page, no image surviving, or the working area being unusable.
pub async fn run(
    page_url: impl AsRef<str>,
    requested: usize,
    config: &PipelineConfig,
) -> Result<RunOutput, PipelineError> {
    run_with_cancel(page_url, requested, config, std::future::pending()).await
}

/// [`run`], abandoned as soon as `cancel` completes.
///
/// On cancellation no further downloads are started, those in flight are
/// dropped, the working area is removed and
/// [`PipelineError::Cancelled`] is returned with the counts so far.
pub async fn run_with_cancel<F>(
    page_url: impl AsRef<str>,
    requested: usize,
    config: &PipelineConfig,
    cancel: F,
) -> Result<RunOutput, PipelineError>
where
    F: Future<Output = ()>,
{
    let page_url = page_url.as_ref().trim();
    let requested = validate_request(page_url, requested, config)?;

    let run_id = RunId::new();
    let tracker = Arc::new(RunTracker::new(
        run_id,
        page_url,
        requested,
        config.progress_callback.clone(),
    ));

    // Stages report through the tracker, which forwards to the caller's
    // observer.
    let mut run_config = config.clone();
    run_config.progress_callback = Some(tracker.clone() as ProgressCallback);

    let span = info_span!("run", id = %run_id.short());
    let started = Instant::now();
    let result = tokio::select! {
        res = execute(page_url, requested, &run_config, &tracker, run_id).instrument(span.clone()) => res,
        _ = cancel => {
            span.in_scope(|| warn!("Run cancelled"));
            Err(PipelineError::Cancelled { summary: Box::default() })
        }
    };

    match result {
        Ok(output) => Ok(output),
        Err(e) => {
            tracker.update(|s| s.total_duration_ms = started.elapsed().as_millis() as u64);
            tracker.set_state(RunState::Failed);
            span.in_scope(|| warn!("Run failed: {}", e));
            let summary = tracker.snapshot();
            tracker.run_complete(&summary);
            Err(e.with_summary(summary))
        }
    }
}

/// Run the pipeline and persist the document to `output_path`.
///
/// The file is written atomically (temp file + rename).
pub async fn run_to_file(
    page_url: impl AsRef<str>,
    requested: usize,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunSummary, PipelineError> {
    let output = run(page_url, requested, config).await?;
    output.document.persist(output_path).await?;
    Ok(output.summary)
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(
    page_url: impl AsRef<str>,
    requested: usize,
    config: &PipelineConfig,
) -> Result<RunOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(page_url, requested, config))
}

async fn execute(
    page_url: &str,
    requested: usize,
    config: &PipelineConfig,
    tracker: &RunTracker,
    run_id: RunId,
) -> Result<RunOutput, PipelineError> {
    let total_start = Instant::now();
    info!("Starting run: {} ({} images)", page_url, requested);

    // ── Step 1: Working area ─────────────────────────────────────────────
    let work_root = config.work_root.clone();
    let area = tokio::task::spawn_blocking(move || WorkingArea::create(work_root.as_deref(), run_id))
        .await
        .map_err(|e| PipelineError::internal(format!("working area task panicked: {}", e)))??;

    // ── Step 2: Fetch markup ─────────────────────────────────────────────
    tracker.set_state(RunState::FetchingMarkup);
    let client = markup::build_client(config)?;
    let html = markup::fetch_markup(&client, page_url, config).await?;

    // ── Step 3: Extract links ────────────────────────────────────────────
    tracker.set_state(RunState::ExtractingLinks);
    let links = extract::extract_refs(&html, page_url, config, requested);
    drop(html);

    tracker.update(|s| {
        s.links_found = links.found;
        s.dispatched = links.refs.len();
    });
    tracker.links_found(links.found, links.refs.len());
    info!(
        "Found {} image links, dispatching {}",
        links.found,
        links.refs.len()
    );

    if links.refs.is_empty() {
        return Err(PipelineError::NoLinksFound {
            url: page_url.to_string(),
            summary: Box::default(),
        });
    }

    // ── Step 4: Bounded fetch ────────────────────────────────────────────
    tracker.set_state(RunState::DownloadingImages);
    let download_start = Instant::now();
    let outcomes = fetch::fetch_all(&client, links.refs, &area.images_dir(), config).await;
    let download_duration_ms = download_start.elapsed().as_millis() as u64;

    let mut failures: Vec<FailureReport> = outcomes
        .iter()
        .filter_map(|o| match o {
            FetchOutcome::Failure {
                origin_index,
                url,
                reason,
            } => Some(FailureReport {
                origin_index: *origin_index,
                url: url.clone(),
                reason: reason.to_string(),
            }),
            FetchOutcome::Success(_) => None,
        })
        .collect();
    failures.sort_by_key(|f| f.origin_index);
    let downloaded = outcomes.len() - failures.len();

    info!(
        "Downloaded {}/{} images in {}ms",
        downloaded,
        outcomes.len(),
        download_duration_ms
    );
    tracker.update(|s| {
        s.downloaded = downloaded;
        s.failed = failures.len();
        s.failures = failures;
        s.download_duration_ms = download_duration_ms;
    });

    // ── Step 5: Paginate ─────────────────────────────────────────────────
    tracker.set_state(RunState::Paginating);
    let paginate_start = Instant::now();
    let paginate_config = config.clone();
    let paginated = tokio::task::spawn_blocking(move || paginate::paginate(&outcomes, &paginate_config))
        .await
        .map_err(|e| PipelineError::internal(format!("paginate task panicked: {}", e)))?;
    let pdf = match paginated {
        Ok(pdf) => pdf,
        Err(e) => {
            if let Some(partial) = e.summary() {
                let page_errors = partial.page_errors.clone();
                let (skipped, placeholders) = (partial.skipped_pages, partial.placeholder_pages);
                tracker.update(|s| {
                    s.skipped_pages = skipped;
                    s.placeholder_pages = placeholders;
                    s.page_errors = page_errors;
                });
            }
            return Err(e);
        }
    };
    let paginate_duration_ms = paginate_start.elapsed().as_millis() as u64;

    // ── Step 6: Write document, drop the image files ─────────────────────
    let pdf_path = area.path().join("document.pdf");
    tokio::fs::write(&pdf_path, &pdf.bytes)
        .await
        .map_err(|e| PipelineError::storage(format!("writing {}", pdf_path.display()), e))?;
    area.discard_images().await;

    let placeholder_pages = pdf.pages.iter().filter(|p| p.placeholder).count();
    let byte_len = pdf.bytes.len() as u64;
    tracker.update(|s| {
        s.pages = pdf.pages.len();
        s.placeholder_pages = placeholder_pages;
        s.skipped_pages = pdf.page_errors.len() - placeholder_pages;
        s.page_errors = pdf.page_errors;
        s.paginate_duration_ms = paginate_duration_ms;
        s.total_duration_ms = total_start.elapsed().as_millis() as u64;
    });

    let summary = tracker.snapshot();
    tracker.set_state(RunState::Done);
    tracker.run_complete(&summary);
    info!(
        "Run complete: {} pages, {} failed downloads, {} bytes, {}ms",
        summary.pages, summary.failed, byte_len, summary.total_duration_ms
    );

    Ok(RunOutput {
        document: Document::new(pdf_path, pdf.pages, byte_len, area),
        summary,
    })
}

/// Run-scoped bookkeeping: the summary built so far, plus the caller's
/// observer.
///
/// Installed as the progress callback the stages see, so per-image counts
/// are current even if the run is cancelled mid-download.
struct RunTracker {
    summary: Mutex<RunSummary>,
    state: Mutex<RunState>,
    inner: Option<ProgressCallback>,
}

impl RunTracker {
    fn new(run_id: RunId, page_url: &str, requested: usize, inner: Option<ProgressCallback>) -> Self {
        Self {
            summary: Mutex::new(RunSummary {
                run_id: Some(run_id),
                page_url: page_url.to_string(),
                requested,
                ..RunSummary::default()
            }),
            state: Mutex::new(RunState::Idle),
            inner,
        }
    }

    fn update(&self, f: impl FnOnce(&mut RunSummary)) {
        let mut guard = self.summary.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    fn snapshot(&self) -> RunSummary {
        self.summary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_state(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Failed and Done are final; a late failure cannot reopen a run.
        if state.is_terminal() || *state == next {
            return;
        }
        debug!("State: {} → {}", *state, next);
        *state = next;
        drop(state);

        if let Some(ref cb) = self.inner {
            cb.on_state_change(next);
        }
    }

    fn links_found(&self, found: usize, dispatched: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_links_found(found, dispatched);
        }
    }

    fn run_complete(&self, summary: &RunSummary) {
        if let Some(ref cb) = self.inner {
            cb.on_run_complete(summary);
        }
    }
}

impl PipelineProgressCallback for RunTracker {
    fn on_image_start(&self, origin_index: usize, total: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_image_start(origin_index, total);
        }
    }

    fn on_image_complete(&self, origin_index: usize, total: usize, bytes: u64) {
        self.update(|s| s.downloaded += 1);
        if let Some(ref cb) = self.inner {
            cb.on_image_complete(origin_index, total, bytes);
        }
    }

    fn on_image_error(&self, origin_index: usize, total: usize, error: &str) {
        self.update(|s| s.failed += 1);
        if let Some(ref cb) = self.inner {
            cb.on_image_error(origin_index, total, error);
        }
    }

    fn on_page_added(&self, page_num: usize, total: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_page_added(page_num, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn validate_accepts_within_ceiling() {
        let config = PipelineConfig::default();
        assert_eq!(validate_request("https://h/g", 3, &config).unwrap(), 3);
        assert_eq!(validate_request("http://h:8080/g?p=1", 20, &config).unwrap(), 20);
    }

    #[test]
    fn validate_rejects_zero_and_excess() {
        let config = PipelineConfig::default();
        assert!(matches!(
            validate_request("https://h/g", 0, &config),
            Err(PipelineError::InvalidCount { requested: 0, .. })
        ));
        assert!(matches!(
            validate_request("https://h/g", 21, &config),
            Err(PipelineError::InvalidCount {
                requested: 21,
                ceiling: 20
            })
        ));
    }

    #[test]
    fn validate_clamps_when_configured() {
        let config = PipelineConfig::builder()
            .max_count(5)
            .count_policy(CountPolicy::Clamp)
            .build()
            .unwrap();
        assert_eq!(validate_request("https://h/g", 50, &config).unwrap(), 5);
        // Zero is never clamped up.
        assert!(validate_request("https://h/g", 0, &config).is_err());
    }

    #[test]
    fn validate_rejects_bad_urls() {
        let config = PipelineConfig::default();
        for url in ["", "h/gallery", "ftp://h/g", "file:///etc/passwd", "https://"] {
            assert!(
                matches!(
                    validate_request(url, 1, &config),
                    Err(PipelineError::InvalidInput { .. })
                ),
                "{url:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn invalid_request_creates_no_working_area() {
        let root = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder().work_root(root.path()).build().unwrap();
        let err = run("not a url", 3, &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
        assert!(err.summary().is_none());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreachable_page_fails_with_summary_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder().work_root(root.path()).build().unwrap();
        let err = run("http://127.0.0.1:9/gallery", 4, &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::MarkupFetch { .. }), "got {err:?}");

        let summary = err.summary().unwrap();
        assert_eq!(summary.requested, 4);
        assert_eq!(summary.page_url, "http://127.0.0.1:9/gallery");
        assert!(summary.run_id.is_some());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unusable_work_root_is_storage_error_with_summary() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();
        let config = PipelineConfig::builder().work_root(&file).build().unwrap();

        let err = run("http://127.0.0.1:9/gallery", 1, &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage { .. }), "got {err:?}");
        let summary = err.summary().expect("storage errors carry the run summary");
        assert_eq!(summary.requested, 1);
        assert_eq!(summary.page_url, "http://127.0.0.1:9/gallery");
        assert!(summary.run_id.is_some());
    }

    #[derive(Default)]
    struct States(StdMutex<Vec<RunState>>);

    impl PipelineProgressCallback for States {
        fn on_state_change(&self, state: RunState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[tokio::test]
    async fn cancel_before_start_reports_failed_state() {
        let root = tempfile::tempdir().unwrap();
        let states = Arc::new(States::default());
        let config = PipelineConfig::builder()
            .work_root(root.path())
            .progress_callback(states.clone())
            .build()
            .unwrap();

        let err = run_with_cancel("https://h/g", 2, &config, std::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }), "got {err:?}");
        assert_eq!(err.summary().unwrap().requested, 2);
        assert_eq!(states.0.lock().unwrap().last(), Some(&RunState::Failed));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn tracker_ignores_transitions_after_terminal_state() {
        let states = Arc::new(States::default());
        let tracker = RunTracker::new(RunId::new(), "https://h/", 1, Some(states.clone() as ProgressCallback));
        tracker.set_state(RunState::FetchingMarkup);
        tracker.set_state(RunState::Failed);
        tracker.set_state(RunState::Done);
        assert_eq!(
            *states.0.lock().unwrap(),
            vec![RunState::FetchingMarkup, RunState::Failed]
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(RunState::DownloadingImages.to_string(), "downloading images");
        assert!(RunState::Done.is_terminal());
        assert!(!RunState::Paginating.is_terminal());
    }
}
