//! Bounded fetcher: download every reference, at most N at a time.
//!
//! ## Admission
//!
//! References are fed in page order into `buffer_unordered(concurrency)`,
//! which admits a new download only when one of the N slots frees up. The
//! first reference submitted is the first admitted; completions arrive in
//! whatever order the network delivers them.
//!
//! ## Per-reference contract
//!
//! Each reference yields exactly one [`FetchOutcome`]. Nothing a single
//! download does (bad status, timeout, oversized body, garbage bytes) can
//! abort or delay the others: every failure is folded into
//! `FetchOutcome::Failure` and the batch carries on. The function returns
//! only once every admitted download has finished, so no request outlives
//! the call.
//!
//! ## Memory
//!
//! Bodies are streamed chunk-by-chunk into the working area instead of being
//! buffered, and the size cap is enforced while streaming. Validation decodes
//! the file under [`image::Limits`] on the blocking pool, then drops the
//! pixels again; only the path travels on to the paginator.

use crate::config::{PipelineConfig, MAX_RETRY_BACKOFF};
use crate::error::FetchError;
use crate::output::{FetchOutcome, FetchedImage, ImageReference};
use futures::stream::{self, StreamExt};
use image::ImageReader;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Download every reference into `dest_dir`, at most `config.concurrency`
/// at a time.
///
/// The returned outcomes are in completion order; sort by
/// [`FetchOutcome::origin_index`] when page order matters.
pub async fn fetch_all(
    client: &Client,
    refs: Vec<ImageReference>,
    dest_dir: &Path,
    config: &PipelineConfig,
) -> Vec<FetchOutcome> {
    let total = refs.len();
    debug!(
        "Fetching {} images, concurrency {}",
        total, config.concurrency
    );

    stream::iter(refs.into_iter().map(|image_ref| async move {
        if let Some(ref cb) = config.progress_callback {
            cb.on_image_start(image_ref.origin_index, total);
        }

        let outcome = fetch_one(client, image_ref, dest_dir, config).await;

        if let Some(ref cb) = config.progress_callback {
            match &outcome {
                FetchOutcome::Success(img) => {
                    cb.on_image_complete(img.origin_index, total, img.byte_len)
                }
                FetchOutcome::Failure {
                    origin_index,
                    reason,
                    ..
                } => cb.on_image_error(*origin_index, total, &reason.to_string()),
            }
        }
        outcome
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await
}

/// Wait before retry number `attempt` (1-based): `base_ms * 2^(attempt-1)`,
/// capped at [`MAX_RETRY_BACKOFF`].
pub(crate) fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_BACKOFF)
}

/// Fetch and validate one reference, retrying transient failures per config.
pub async fn fetch_one(
    client: &Client,
    image_ref: ImageReference,
    dest_dir: &Path,
    config: &PipelineConfig,
) -> FetchOutcome {
    let ImageReference { url, origin_index } = image_ref;
    let dest = dest_dir.join(format!("{origin_index:05}.img"));

    let mut attempt = 0u32;
    let result = loop {
        if attempt > 0 {
            let backoff = retry_delay(config.retry_backoff_ms, attempt);
            warn!(
                "Image {}: retry {}/{} after {}ms",
                origin_index,
                attempt,
                config.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match download(client, &url, &dest, config).await {
            Ok(content_type) => break validate(&dest, content_type).await,
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                debug!("Image {}: attempt {} failed: {}", origin_index, attempt + 1, e);
                attempt += 1;
            }
            Err(e) => break Err(e),
        }
    };

    match result {
        Ok(v) => {
            debug!(
                "Image {}: {} bytes, {}x{} {}",
                origin_index, v.byte_len, v.width, v.height, v.content_type
            );
            FetchOutcome::Success(FetchedImage {
                origin_index,
                url,
                path: dest,
                content_type: v.content_type,
                byte_len: v.byte_len,
                width: v.width,
                height: v.height,
            })
        }
        Err(reason) => {
            warn!("Image {} ({}) failed: {}", origin_index, url, reason);
            // Partial or invalid bodies never reach the paginator.
            if let Err(e) = tokio::fs::remove_file(&dest).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", dest.display(), e);
                }
            }
            FetchOutcome::Failure {
                origin_index,
                url,
                reason,
            }
        }
    }
}

/// Stream the body of `url` into `dest`. Returns the `Content-Type` header.
async fn download(
    client: &Client,
    url: &str,
    dest: &Path,
    config: &PipelineConfig,
) -> Result<Option<String>, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        detail: format!("{url}: {e}"),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            detail: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    let timeout_ms = config.request_timeout.as_millis() as u64;
    let limit = config.max_image_bytes;

    let response = client
        .get(parsed)
        .timeout(config.request_timeout)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(&e, timeout_ms))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
        });
    }

    if response.content_length().is_some_and(|len| len > limit) {
        return Err(FetchError::TooLarge { limit });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty());

    let storage = |e: std::io::Error| FetchError::Storage {
        detail: format!("{}: {}", dest.display(), e),
    };
    let mut file = tokio::fs::File::create(dest).await.map_err(storage)?;

    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| FetchError::from_reqwest(&e, timeout_ms))?;
        written += chunk.len() as u64;
        if written > limit {
            return Err(FetchError::TooLarge { limit });
        }
        file.write_all(&chunk).await.map_err(storage)?;
    }
    file.flush().await.map_err(storage)?;

    if written == 0 {
        return Err(FetchError::InvalidImage {
            detail: "empty body".into(),
        });
    }

    Ok(content_type)
}

#[derive(Debug)]
struct Validated {
    content_type: String,
    byte_len: u64,
    width: u32,
    height: u32,
}

/// Fully decode the downloaded file on the blocking pool.
async fn validate(path: &Path, header_type: Option<String>) -> Result<Validated, FetchError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || validate_blocking(&path, header_type))
        .await
        .map_err(|e| FetchError::InvalidImage {
            detail: format!("validation task panicked: {e}"),
        })?
}

fn validate_blocking(path: &Path, header_type: Option<String>) -> Result<Validated, FetchError> {
    let invalid = |e: &dyn std::fmt::Display| FetchError::InvalidImage {
        detail: e.to_string(),
    };

    let byte_len = std::fs::metadata(path)
        .map_err(|e| FetchError::Storage {
            detail: e.to_string(),
        })?
        .len();

    let reader = ImageReader::open(path)
        .map_err(|e| invalid(&e))?
        .with_guessed_format()
        .map_err(|e| invalid(&e))?;
    let format = reader.format();
    let image = decode_with_limits(reader).map_err(|e| invalid(&e))?;

    // Servers love `application/octet-stream`; prefer what the bytes say.
    let content_type = match (header_type, format) {
        (Some(h), _) if h.starts_with("image/") => h,
        (_, Some(f)) => f.to_mime_type().to_string(),
        (Some(h), None) => h,
        (None, None) => "application/octet-stream".to_string(),
    };

    Ok(Validated {
        content_type,
        byte_len,
        width: image.width(),
        height: image.height(),
    })
}

/// Decode under the default [`image::Limits`], which cap the allocation a
/// single hostile image can force.
pub(crate) fn decode_with_limits<R>(mut reader: ImageReader<R>) -> image::ImageResult<image::DynamicImage>
where
    R: std::io::BufRead + std::io::Seek,
{
    reader.limits(image::Limits::default());
    reader.decode()
}
