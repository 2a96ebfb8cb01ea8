//! Page fetch: the HTTP GET that produces the markup to scrape.
//!
//! Also owns construction of the shared `reqwest::Client`, so the page fetch
//! and every image fetch of a run go through one connection pool with the
//! same `User-Agent`.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::RunSummary;
use reqwest::Client;
use tracing::{debug, info};

/// Build the HTTP client shared by one run.
///
/// No client-wide timeout is set: the page fetch and each image fetch set
/// their own per-request timeout.
pub fn build_client(config: &PipelineConfig) -> Result<Client, PipelineError> {
    Client::builder()
        .user_agent(&config.user_agent)
        .build()
        .map_err(|e| PipelineError::internal(format!("Failed to build HTTP client: {e}")))
}

/// Fetch the page at `url` and return its body as text.
///
/// Any network error, timeout or non-2xx status is fatal for the run.
pub async fn fetch_markup(
    client: &Client,
    url: &str,
    config: &PipelineConfig,
) -> Result<String, PipelineError> {
    info!("Fetching page: {}", url);
    let timeout = config.markup_timeout;

    let fail = |reason: String| PipelineError::MarkupFetch {
        url: url.to_string(),
        reason,
        summary: Box::default(),
    };
    let map_reqwest = |e: reqwest::Error| {
        if e.is_timeout() {
            PipelineError::MarkupTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
                summary: Box::<RunSummary>::default(),
            }
        } else {
            fail(e.to_string())
        }
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(map_reqwest)?;

    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }

    let body = response.text().await.map_err(map_reqwest)?;
    debug!("Fetched {} bytes of markup from {}", body.len(), url);
    Ok(body)
}
