//! CLI binary for gallery2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig`, shows progress and writes the PDF.

use anyhow::{Context, Result};
use clap::Parser;
use gallery2pdf::{
    run_with_cancel, CountPolicy, LinkFilter, PageSize, PageSizing, PipelineConfig,
    PipelineError, PipelineProgressCallback, ProgressCallback, RenderFailurePolicy, RunState,
    RunSummary,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the page is fetched, then a bar over the image downloads.
/// Downloads finish out of order, so every line names its image.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Downloading");
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_state_change(&self, state: RunState) {
        match state {
            RunState::FetchingMarkup => self.bar.set_prefix("Fetching page"),
            RunState::ExtractingLinks => self.bar.set_prefix("Scanning"),
            RunState::Paginating => {
                self.bar.set_prefix("Building PDF");
                self.bar.set_message("");
            }
            _ => {}
        }
    }

    fn on_links_found(&self, found: usize, dispatched: usize) {
        self.activate_bar(dispatched);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {found} images, downloading {dispatched}"))
        ));
    }

    fn on_image_start(&self, origin_index: usize, _total: usize) {
        self.bar.set_message(format!("image {}", origin_index + 1));
    }

    fn on_image_complete(&self, origin_index: usize, total: usize, bytes: u64) {
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            green("✓"),
            origin_index + 1,
            total,
            dim(&format!("{:>8.1} KiB", bytes as f64 / 1024.0)),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, origin_index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            red("✗"),
            origin_index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # First 10 images of a page into gallery.pdf
  gallery2pdf https://example.com/gallery

  # 20 images, A4 pages, 4 downloads at a time
  gallery2pdf -n 20 --sizing a4 --concurrency 4 https://example.com/album -o album.pdf

  # Lazy-loaded gallery: read data-src before src, keep only raster images
  gallery2pdf --data-src --ext jpg,png,webp https://example.com/feed

  # Machine-readable summary
  gallery2pdf --json https://example.com/gallery > summary.json

ENVIRONMENT VARIABLES:
  Every flag has a GALLERY2PDF_* fallback, e.g. GALLERY2PDF_CONCURRENCY=4.
  RUST_LOG overrides the log filter (logs go to stderr).
"#;

/// Download the images of a web page into one PDF.
#[derive(Parser, Debug)]
#[command(
    name = "gallery2pdf",
    version,
    about = "Download the images of a web page into one PDF",
    long_about = "Scrape the <img> links of a web page, download up to COUNT of them \
concurrently and assemble them into a single PDF, one image per page in page order. \
Images that fail to download are reported and left out.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL of the page to scrape.
    url: String,

    /// Number of images to include.
    #[arg(short = 'n', long, env = "GALLERY2PDF_COUNT", default_value_t = 10)]
    count: usize,

    /// Where to write the PDF.
    #[arg(short, long, env = "GALLERY2PDF_OUTPUT", default_value = "gallery.pdf")]
    output: PathBuf,

    /// Downloads in flight at once.
    #[arg(short, long, env = "GALLERY2PDF_CONCURRENCY", default_value_t = 10,
          value_parser = clap::value_parser!(u32).range(1..=64))]
    concurrency: u32,

    /// Per-image timeout in seconds.
    #[arg(long, env = "GALLERY2PDF_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Page fetch timeout in seconds.
    #[arg(long, env = "GALLERY2PDF_PAGE_TIMEOUT", default_value_t = 30)]
    page_timeout: u64,

    /// Most images a single run may ask for.
    #[arg(long, env = "GALLERY2PDF_MAX_COUNT", default_value_t = 20)]
    max_count: usize,

    /// Lower COUNT to the ceiling instead of refusing it.
    #[arg(long, env = "GALLERY2PDF_CLAMP")]
    clamp: bool,

    /// Page size: native (one image pixel per point), letter or a4.
    #[arg(long, env = "GALLERY2PDF_SIZING", value_enum, default_value = "native")]
    sizing: SizingArg,

    /// Downscale images whose longest edge exceeds this many pixels.
    #[arg(long, env = "GALLERY2PDF_MAX_DIMENSION")]
    max_dimension: Option<u32>,

    /// Per-image size limit in MiB.
    #[arg(long, env = "GALLERY2PDF_MAX_MIB", default_value_t = 32)]
    max_mib: u64,

    /// Text stamped in the corner of every page.
    #[arg(long, env = "GALLERY2PDF_WATERMARK")]
    watermark: Option<String>,

    /// What to do with a downloaded image that cannot be rendered.
    #[arg(long, env = "GALLERY2PDF_ON_RENDER_FAILURE", value_enum, default_value = "skip")]
    on_render_failure: RenderFailureArg,

    /// Only keep images served from the page's own host.
    #[arg(long, env = "GALLERY2PDF_SAME_HOST")]
    same_host: bool,

    /// Only keep links with these extensions (comma-separated).
    #[arg(long, env = "GALLERY2PDF_EXT", value_delimiter = ',')]
    ext: Vec<String>,

    /// Prefer `data-src` over `src` (lazy-loading galleries).
    #[arg(long, env = "GALLERY2PDF_DATA_SRC")]
    data_src: bool,

    /// Keep repeated links instead of collapsing them.
    #[arg(long, env = "GALLERY2PDF_NO_DEDUPE")]
    no_dedupe: bool,

    /// Retries per image on timeouts, connection errors, 429 and 5xx.
    #[arg(long, env = "GALLERY2PDF_RETRIES", default_value_t = 0)]
    retries: u32,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "GALLERY2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "GALLERY2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "GALLERY2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "GALLERY2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum SizingArg {
    Native,
    Letter,
    A4,
}

impl From<SizingArg> for PageSizing {
    fn from(v: SizingArg) -> Self {
        match v {
            SizingArg::Native => PageSizing::Native,
            SizingArg::Letter => PageSizing::FixedCanvas(PageSize::LETTER),
            SizingArg::A4 => PageSizing::FixedCanvas(PageSize::A4),
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum RenderFailureArg {
    Skip,
    Placeholder,
}

impl From<RenderFailureArg> for RenderFailurePolicy {
    fn from(v: RenderFailureArg) -> Self {
        match v {
            RenderFailureArg::Skip => RenderFailurePolicy::Skip,
            RenderFailureArg::Placeholder => RenderFailurePolicy::Placeholder,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs; verbose mode wins anyway.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run, cancellable with Ctrl-C ─────────────────────────────────────
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available: never cancel.
            std::future::pending::<()>().await;
        }
    };

    let output = match run_with_cancel(&cli.url, cli.count, &config, ctrl_c).await {
        Ok(output) => output,
        Err(e) => {
            if !cli.quiet {
                report_failure(&e);
            }
            if cli.json {
                if let Some(summary) = e.summary() {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(summary).context("Failed to serialise summary")?
                    );
                }
            }
            return Err(anyhow::Error::new(e).context(failure_headline(&cli.url)));
        }
    };

    let summary = output.summary;
    let path = output
        .document
        .persist(&cli.output)
        .await
        .context("Failed to save PDF")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    }

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  ({}/{} images, {} failed)  {}ms  →  {}",
            if summary.failed == 0 && summary.page_errors.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&summary.pages.to_string()),
            summary.downloaded,
            summary.dispatched,
            summary.failed,
            summary.total_duration_ms,
            bold(&path.display().to_string()),
        );
        for failure in &summary.failures {
            eprintln!(
                "   {} #{} {}  {}",
                red("✗"),
                failure.origin_index + 1,
                dim(&failure.url),
                failure.reason
            );
        }
        for page_error in &summary.page_errors {
            eprintln!("   {} {}", cyan("⚠"), page_error);
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let link_filter = LinkFilter {
        same_host: cli.same_host,
        extensions: cli
            .ext
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect(),
        http_only: true,
    };

    let src_attributes: &[&str] = if cli.data_src {
        &["data-src", "src"]
    } else {
        &["src"]
    };

    let mut builder = PipelineConfig::builder()
        .concurrency(cli.concurrency as usize)
        .request_timeout(Duration::from_secs(cli.timeout))
        .markup_timeout(Duration::from_secs(cli.page_timeout))
        .max_count(cli.max_count)
        .count_policy(if cli.clamp {
            CountPolicy::Clamp
        } else {
            CountPolicy::Reject
        })
        .page_sizing(cli.sizing.clone().into())
        .max_image_bytes(cli.max_mib.saturating_mul(1024 * 1024))
        .render_failure(cli.on_render_failure.clone().into())
        .link_filter(link_filter)
        .src_attributes(src_attributes.iter().copied())
        .dedupe_links(!cli.no_dedupe)
        .max_retries(cli.retries);

    if let Some(px) = cli.max_dimension {
        builder = builder.max_image_dimension(px);
    }
    if let Some(ref text) = cli.watermark {
        builder = builder.watermark(text.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn failure_headline(url: &str) -> String {
    format!("Could not build a PDF from {url}")
}

/// Explain a fatal error in terms of what the user can do about it.
fn report_failure(e: &PipelineError) {
    let hint = match e {
        PipelineError::InvalidInput { .. } => "Check the URL: it must start with http:// or https://.",
        PipelineError::InvalidCount { .. } => {
            "Pick a smaller --count, raise --max-count, or pass --clamp."
        }
        PipelineError::MarkupFetch { .. } | PipelineError::MarkupTimeout { .. } => {
            "The page itself could not be loaded; nothing was downloaded."
        }
        PipelineError::NoLinksFound { .. } => {
            "The page has no usable <img> links. Try --data-src, or drop --ext/--same-host."
        }
        PipelineError::EmptyInput { .. } => "No image made it onto a page; see the reasons below.",
        PipelineError::Cancelled { .. } => "Interrupted; temporary files were removed.",
        PipelineError::Storage { .. } | PipelineError::OutputWriteFailed { .. } => {
            "Check free disk space and permissions."
        }
        PipelineError::InvalidConfig(_) | PipelineError::Internal { .. } => "",
    };

    eprintln!("{} {}", red("✘"), bold(&e.to_string()));
    if !hint.is_empty() {
        eprintln!("   {}", dim(hint));
    }

    if let Some(summary) = e.summary() {
        eprintln!(
            "   links found {}, dispatched {}, downloaded {}, failed {}",
            summary.links_found, summary.dispatched, summary.downloaded, summary.failed
        );
        for failure in summary.failures.iter().take(10) {
            eprintln!(
                "   {} #{} {}  {}",
                red("✗"),
                failure.origin_index + 1,
                dim(&failure.url),
                failure.reason
            );
        }
        for page_error in summary.page_errors.iter().take(10) {
            eprintln!("   {} {}", red("✗"), page_error);
        }
    }
}
