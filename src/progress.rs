//! Progress-callback trait for per-run and per-image events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages and downloads each image.
//!
//! Events are advisory: nothing the callback does can change which images
//! are fetched or how the run ends.
//!
//! # Example
//!
//! ```rust
//! use gallery2pdf::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, origin_index: usize, total: usize, bytes: u64) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("image #{origin_index} ({bytes} bytes), {n}/{total} done");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunSummary;
use crate::run::RunState;
use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// Implementations must be `Send + Sync`: image events fire from whichever
/// download completes first, in no particular order. All methods have
/// default no-op implementations so callers only override what they need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called on every state-machine transition, including the terminal one.
    fn on_state_change(&self, state: RunState) {
        let _ = state;
    }

    /// Called once extraction is done.
    ///
    /// # Arguments
    /// * `found`      — links on the page after filtering
    /// * `dispatched` — links that will be downloaded (after the cap)
    fn on_links_found(&self, found: usize, dispatched: usize) {
        let _ = (found, dispatched);
    }

    /// Called when an image download is admitted through the gate.
    fn on_image_start(&self, origin_index: usize, total: usize) {
        let _ = (origin_index, total);
    }

    /// Called when an image downloaded and validated.
    fn on_image_complete(&self, origin_index: usize, total: usize, bytes: u64) {
        let _ = (origin_index, total, bytes);
    }

    /// Called when an image failed for good (after any retries).
    fn on_image_error(&self, origin_index: usize, total: usize, error: &str) {
        let _ = (origin_index, total, error);
    }

    /// Called when a page is appended to the document.
    ///
    /// # Arguments
    /// * `page_num` — 1-indexed page number within the document
    /// * `total`    — images handed to the paginator
    fn on_page_added(&self, page_num: usize, total: usize) {
        let _ = (page_num, total);
    }

    /// Called once when the run ends, successfully or not.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
