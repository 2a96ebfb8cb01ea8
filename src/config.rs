//! Configuration types for a scrape-and-paginate run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct carries every knob so a config
//! can be shared across concurrent runs and logged as a single value.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound the builder applies to [`PipelineConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Longest single wait between two attempts at the same image.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use gallery2pdf::{PageSizing, PageSize, PipelineConfig};
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .concurrency(4)
///     .request_timeout(Duration::from_secs(15))
///     .page_sizing(PageSizing::FixedCanvas(PageSize::A4))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum number of image downloads in flight at once. Default: 10.
    ///
    /// Image hosts throttle aggressively; ten parallel requests is enough to
    /// hide latency without tripping most per-client limits.
    pub concurrency: usize,

    /// Per-image request timeout, covering connect, headers and body. Default: 30 s.
    pub request_timeout: Duration,

    /// Timeout for fetching the page markup. Default: 30 s.
    pub markup_timeout: Duration,

    /// Ceiling on the number of images a single run may request. Default: 20.
    pub max_count: usize,

    /// What to do with requests above [`Self::max_count`]. Default: reject.
    pub count_policy: CountPolicy,

    /// How page geometry is derived from each image. Default: native size.
    pub page_sizing: PageSizing,

    /// Optional cap on the longest image edge, in pixels.
    ///
    /// Larger images are downscaled (aspect preserved) before embedding, which
    /// bounds both peak memory while paginating and the size of the output.
    pub max_image_dimension: Option<u32>,

    /// Per-image download cap in bytes. Default: 32 MiB.
    ///
    /// Enforced while streaming, so an oversized body is abandoned as soon as
    /// it crosses the cap rather than after it has been written in full.
    pub max_image_bytes: u64,

    /// Retry attempts for a transient image-fetch failure. Default: 0.
    /// The builder caps it at [`MAX_RETRIES`].
    ///
    /// Only timeouts, transport errors, HTTP 429 and 5xx are retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Which extracted links are kept.
    pub link_filter: LinkFilter,

    /// `<img>` attributes consulted for the source URL, in priority order.
    /// Default: `["src"]`. Add `"data-src"` for lazily-loaded galleries.
    pub src_attributes: Vec<String>,

    /// Drop repeated URLs before applying the image cap. Default: true.
    pub dedupe_links: bool,

    /// What happens to a page whose image cannot be rendered. Default: skip.
    pub render_failure: RenderFailurePolicy,

    /// Optional text stamped in the corner of every image page.
    pub watermark: Option<String>,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Parent directory for run working areas. Default: the system temp dir.
    pub work_root: Option<PathBuf>,

    /// Optional observer for run progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            request_timeout: Duration::from_secs(30),
            markup_timeout: Duration::from_secs(30),
            max_count: 20,
            count_policy: CountPolicy::default(),
            page_sizing: PageSizing::default(),
            max_image_dimension: None,
            max_image_bytes: 32 * 1024 * 1024,
            max_retries: 0,
            retry_backoff_ms: 500,
            link_filter: LinkFilter::default(),
            src_attributes: vec!["src".to_string()],
            dedupe_links: true,
            render_failure: RenderFailurePolicy::default(),
            watermark: None,
            user_agent: concat!("gallery2pdf/", env!("CARGO_PKG_VERSION")).to_string(),
            work_root: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("concurrency", &self.concurrency)
            .field("request_timeout", &self.request_timeout)
            .field("markup_timeout", &self.markup_timeout)
            .field("max_count", &self.max_count)
            .field("count_policy", &self.count_policy)
            .field("page_sizing", &self.page_sizing)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("max_retries", &self.max_retries)
            .field("link_filter", &self.link_filter)
            .field("dedupe_links", &self.dedupe_links)
            .field("render_failure", &self.render_failure)
            .field("watermark", &self.watermark)
            .field("work_root", &self.work_root)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn markup_timeout(mut self, timeout: Duration) -> Self {
        self.config.markup_timeout = timeout;
        self
    }

    pub fn max_count(mut self, n: usize) -> Self {
        self.config.max_count = n;
        self
    }

    pub fn count_policy(mut self, policy: CountPolicy) -> Self {
        self.config.count_policy = policy;
        self
    }

    pub fn page_sizing(mut self, sizing: PageSizing) -> Self {
        self.config.page_sizing = sizing;
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = Some(px.max(16));
        self
    }

    pub fn max_image_bytes(mut self, bytes: u64) -> Self {
        self.config.max_image_bytes = bytes;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn link_filter(mut self, filter: LinkFilter) -> Self {
        self.config.link_filter = filter;
        self
    }

    pub fn src_attributes<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.src_attributes = attrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn dedupe_links(mut self, v: bool) -> Self {
        self.config.dedupe_links = v;
        self
    }

    pub fn render_failure(mut self, policy: RenderFailurePolicy) -> Self {
        self.config.render_failure = policy;
        self
    }

    pub fn watermark(mut self, text: impl Into<String>) -> Self {
        self.config.watermark = Some(text.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_root = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "Image count ceiling must be ≥ 1".into(),
            ));
        }
        if c.request_timeout.is_zero() || c.markup_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "Timeouts must be non-zero".into(),
            ));
        }
        if c.src_attributes.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "At least one <img> source attribute is required".into(),
            ));
        }
        if let PageSizing::FixedCanvas(size) = c.page_sizing {
            if !(size.width > 0.0 && size.height > 0.0) {
                return Err(PipelineError::InvalidConfig(format!(
                    "Canvas must have a positive size, got {}x{}",
                    size.width, size.height
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Treatment of an image count above [`PipelineConfig::max_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CountPolicy {
    /// Fail the request with [`PipelineError::InvalidCount`]. (default)
    #[default]
    Reject,
    /// Lower the request to the ceiling and carry on.
    Clamp,
}

/// A page size in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    /// US Letter, 8.5 × 11 in.
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };

    /// ISO A4, 210 × 297 mm.
    pub const A4: PageSize = PageSize {
        width: 595.28,
        height: 841.89,
    };
}

/// How page geometry is derived from each image.
///
/// | Policy | Page size | Image placement |
/// |--------|-----------|-----------------|
/// | `Native` | image pixel size (1 px = 1 pt) | fills the page |
/// | `FixedCanvas` | constant | scaled down to fit, centred |
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PageSizing {
    /// Every page matches its image exactly. (default)
    #[default]
    Native,
    /// Every page has the given size; images are shrunk (never enlarged)
    /// to fit and centred, leaving a blank margin.
    FixedCanvas(PageSize),
}

/// What the paginator does with an image that cannot be rendered even
/// after converting it to 8-bit RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderFailurePolicy {
    /// Leave the image out; later pages move up. (default)
    #[default]
    Skip,
    /// Insert a blank page so page positions still match image positions.
    Placeholder,
}

/// Filter applied to normalised image links.
///
/// Source sites differ too much for a hardcoded rule, so every check is
/// opt-in apart from `http_only`, which drops `data:` URIs and anything
/// else that cannot be requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFilter {
    /// Keep only links on the same host as the page.
    pub same_host: bool,
    /// Keep only links whose path ends in one of these extensions
    /// (case-insensitive, without the dot). Empty keeps everything.
    pub extensions: Vec<String>,
    /// Keep only `http://` and `https://` links. Default: true.
    pub http_only: bool,
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self {
            same_host: false,
            extensions: Vec::new(),
            http_only: true,
        }
    }
}

impl LinkFilter {
    /// Common raster extensions, for galleries that mix in icons and
    /// tracking pixels served from script endpoints.
    pub fn image_extensions() -> Vec<String> {
        ["jpg", "jpeg", "png", "gif", "webp"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}
