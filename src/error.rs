//! Error types for the gallery2pdf library.
//!
//! Three error types reflect three distinct blast radii:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot produce a document at all
//!   (bad input, page fetch failed, nothing scraped, every image failed).
//!   Returned as `Err(PipelineError)` from the top-level `run*` functions.
//!
//! * [`FetchError`] — **Non-fatal, per image**: one URL failed to download or
//!   did not decode as an image. Stored in [`crate::output::FetchOutcome`]
//!   and counted in the run summary; the batch carries on.
//!
//! * [`PageError`] — **Non-fatal, per page**: an image that downloaded fine
//!   could not be placed on a page. Handled by the configured
//!   [`crate::config::RenderFailurePolicy`].
//!
//! Every fatal error raised after the request has been validated carries the
//! [`RunSummary`] gathered so far, so callers can always report how many
//! links were found and how many images came through.

use crate::output::RunSummary;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the gallery2pdf library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The page URL is not a valid HTTP/HTTPS URL.
    #[error("Invalid page URL '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// The requested image count is zero or above the configured ceiling.
    #[error("Invalid image count {requested}: must be between 1 and {ceiling}")]
    InvalidCount { requested: usize, ceiling: usize },

    // ── Page errors ───────────────────────────────────────────────────────
    /// The page itself could not be fetched.
    #[error("Failed to fetch page '{url}': {reason}")]
    MarkupFetch {
        url: String,
        reason: String,
        summary: Box<RunSummary>,
    },

    /// The page fetch exceeded the configured timeout.
    #[error("Fetching page '{url}' timed out after {secs}s")]
    MarkupTimeout {
        url: String,
        secs: u64,
        summary: Box<RunSummary>,
    },

    /// The page contained no usable image links.
    #[error("No images found on '{url}'")]
    NoLinksFound { url: String, summary: Box<RunSummary> },

    // ── Image errors ──────────────────────────────────────────────────────
    /// Every image failed to download or render; the document would be empty.
    #[error(
        "No images could be retrieved ({} requested, {} failed to download, {} failed to render)",
        .summary.dispatched,
        .summary.failed,
        .summary.page_errors.len()
    )]
    EmptyInput { summary: Box<RunSummary> },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The run's working area could not be created or written.
    #[error("Working area error: {detail}: {source}")]
    Storage {
        detail: String,
        #[source]
        source: std::io::Error,
        summary: Box<RunSummary>,
    },

    /// Could not write the finished document to its destination.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Control ───────────────────────────────────────────────────────────
    /// The run was cancelled before it finished.
    #[error("Run cancelled after {} of {} images", .summary.downloaded + .summary.failed, .summary.dispatched)]
    Cancelled { summary: Box<RunSummary> },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {detail}")]
    Internal {
        detail: String,
        summary: Box<RunSummary>,
    },
}

impl PipelineError {
    /// The partial run summary attached to this error, when the run got far
    /// enough to have one.
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            PipelineError::MarkupFetch { summary, .. }
            | PipelineError::MarkupTimeout { summary, .. }
            | PipelineError::NoLinksFound { summary, .. }
            | PipelineError::EmptyInput { summary }
            | PipelineError::Storage { summary, .. }
            | PipelineError::Internal { summary, .. }
            | PipelineError::Cancelled { summary } => Some(summary),
            _ => None,
        }
    }

    /// Replace the attached summary, if this variant carries one.
    pub(crate) fn with_summary(mut self, new: RunSummary) -> Self {
        match &mut self {
            PipelineError::MarkupFetch { summary, .. }
            | PipelineError::MarkupTimeout { summary, .. }
            | PipelineError::NoLinksFound { summary, .. }
            | PipelineError::EmptyInput { summary }
            | PipelineError::Storage { summary, .. }
            | PipelineError::Internal { summary, .. }
            | PipelineError::Cancelled { summary } => **summary = new,
            _ => {}
        }
        self
    }

    pub(crate) fn storage(detail: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Storage {
            detail: detail.into(),
            source,
            summary: Box::default(),
        }
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        PipelineError::Internal {
            detail: detail.into(),
            summary: Box::default(),
        }
    }
}

/// A non-fatal error for a single image download.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FetchError {
    /// The extracted URL is not something we can request.
    #[error("invalid URL: {detail}")]
    InvalidUrl { detail: String },

    /// Server answered with a non-2xx status.
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// Request exceeded the per-request timeout.
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Connection, TLS or body-stream failure.
    #[error("transport error: {detail}")]
    Transport { detail: String },

    /// The body exceeded the configured size cap.
    #[error("body larger than {limit} bytes")]
    TooLarge { limit: u64 },

    /// The body downloaded but is not a decodable image.
    #[error("invalid image: {detail}")]
    InvalidImage { detail: String },

    /// The body could not be written into the working area.
    #[error("storage error: {detail}")]
    Storage { detail: String },
}

impl FetchError {
    /// Whether a later attempt has a realistic chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            FetchError::Http { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(e: &reqwest::Error, timeout_ms: u64) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { ms: timeout_ms }
        } else if let Some(status) = e.status() {
            FetchError::Http {
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                detail: e.to_string(),
            }
        }
    }
}

/// A non-fatal error for a single page of the document.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PageError {
    /// The image decoded during download validation but could not be placed
    /// on a page, even after converting it to 8-bit RGB.
    #[error("Image {origin_index}: page render failed: {detail}")]
    RenderFailed { origin_index: usize, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(dispatched: usize, downloaded: usize, failed: usize) -> Box<RunSummary> {
        Box::new(RunSummary {
            dispatched,
            downloaded,
            failed,
            ..RunSummary::default()
        })
    }

    #[test]
    fn empty_input_display() {
        let e = PipelineError::EmptyInput {
            summary: summary(3, 0, 3),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 requested"), "got: {msg}");
        assert!(msg.contains("3 failed to download"), "got: {msg}");
        assert!(msg.contains("0 failed to render"), "got: {msg}");
    }

    #[test]
    fn invalid_count_display() {
        let e = PipelineError::InvalidCount {
            requested: 50,
            ceiling: 20,
        };
        assert!(e.to_string().contains("between 1 and 20"));
    }

    #[test]
    fn summary_is_exposed_for_run_errors_only() {
        let e = PipelineError::NoLinksFound {
            url: "https://h/".into(),
            summary: summary(0, 0, 0),
        };
        assert!(e.summary().is_some());

        let e = PipelineError::InvalidConfig("x".into());
        assert!(e.summary().is_none());
    }

    #[test]
    fn with_summary_replaces_counts() {
        let e = PipelineError::EmptyInput {
            summary: summary(0, 0, 0),
        };
        let e = e.with_summary(RunSummary {
            requested: 5,
            links_found: 7,
            dispatched: 5,
            failed: 5,
            ..RunSummary::default()
        });
        let s = e.summary().unwrap();
        assert_eq!(s.requested, 5);
        assert_eq!(s.links_found, 7);
    }

    #[test]
    fn storage_and_internal_errors_keep_the_run_summary() {
        let counts = RunSummary {
            requested: 4,
            links_found: 9,
            downloaded: 4,
            ..RunSummary::default()
        };

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = PipelineError::storage("writing document.pdf", io).with_summary(counts.clone());
        let s = e.summary().unwrap();
        assert_eq!((s.requested, s.links_found, s.downloaded), (4, 9, 4));

        let e = PipelineError::internal("task panicked").with_summary(counts);
        assert_eq!(e.summary().unwrap().requested, 4);
        assert_eq!(e.to_string(), "Internal error: task panicked");
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout { ms: 10 }.is_transient());
        assert!(FetchError::Http { status: 503 }.is_transient());
        assert!(FetchError::Http { status: 429 }.is_transient());
        assert!(!FetchError::Http { status: 404 }.is_transient());
        assert!(!FetchError::InvalidImage {
            detail: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn render_failed_display() {
        let e = PageError::RenderFailed {
            origin_index: 4,
            detail: "unsupported".into(),
        };
        assert!(e.to_string().contains("Image 4"));
    }
}
