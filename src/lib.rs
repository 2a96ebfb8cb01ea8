//! # gallery2pdf
//!
//! Scrape the images embedded in a web page and assemble them into a single
//! PDF, one image per page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page URL
//!  │
//!  ├─ 1. Markup    GET the page (per-request timeout)
//!  ├─ 2. Extract   <img> sources in document order, normalised, filtered, capped
//!  ├─ 3. Fetch     at most N downloads in flight, streamed into a per-run temp dir
//!  ├─ 4. Paginate  sort by page order, one page per image (spawn_blocking)
//!  └─ 5. Output    Document (PDF in the working area) + RunSummary
//! ```
//!
//! A single image failing never fails the run: it is recorded in the
//! summary and the document is built from whatever did arrive. The run
//! only fails when there is nothing to build a document from.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gallery2pdf::{run, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let output = run("https://example.com/gallery", 12, &config).await?;
//!     eprintln!(
//!         "{} pages ({} of {} images failed)",
//!         output.document.page_count(),
//!         output.summary.failed,
//!         output.summary.dispatched,
//!     );
//!     output.document.persist("gallery.pdf").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `gallery2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! gallery2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod workarea;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CountPolicy, LinkFilter, PageSize, PageSizing, PipelineConfig, PipelineConfigBuilder,
    RenderFailurePolicy,
};
pub use error::{FetchError, PageError, PipelineError};
pub use output::{
    Document, FailureReport, FetchOutcome, FetchedImage, ImageReference, PageInfo, RunOutput,
    RunSummary,
};
pub use pipeline::extract::{extract, extract_with};
pub use pipeline::normalize::normalize;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use run::{run, run_sync, run_to_file, run_with_cancel, validate_request, RunState};
pub use workarea::{RunId, WorkingArea};
