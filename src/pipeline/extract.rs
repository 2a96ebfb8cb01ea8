//! Link extraction: page markup → ordered image URLs.
//!
//! Pure transform over markup that has already been fetched. Every `<img>`
//! element is visited in document order, its source attribute normalised
//! against the page URL and passed through the configured [`LinkFilter`].
//! An empty result is a valid outcome; the orchestrator turns it into
//! [`crate::error::PipelineError::NoLinksFound`].

use crate::config::{LinkFilter, PipelineConfig};
use crate::output::ImageReference;
use crate::pipeline::normalize::normalize;
use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;

static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("static selector"));

/// Extract every image URL from `markup`, in document order, reading `src`.
///
/// `filter` is applied after normalisation; `None` keeps everything.
/// Duplicates are kept.
pub fn extract(markup: &str, page_url: &str, filter: Option<&dyn Fn(&str) -> bool>) -> Vec<String> {
    extract_with(markup, page_url, &["src"], filter)
}

/// [`extract`], taking the source from the first non-empty attribute in
/// `attrs` (e.g. `data-src` before `src` for lazy-loading galleries).
pub fn extract_with(
    markup: &str,
    page_url: &str,
    attrs: &[&str],
    filter: Option<&dyn Fn(&str) -> bool>,
) -> Vec<String> {
    collect_sources(markup, attrs)
        .into_iter()
        .map(|src| normalize(&src, page_url))
        .filter(|url| filter.map_or(true, |f| f(url)))
        .collect()
}

/// Links extracted for a run, with the cap applied.
#[derive(Debug, Clone, Default)]
pub struct ExtractedLinks {
    /// Links on the page after filtering (and de-duplication, when enabled).
    pub found: usize,
    /// The first `min(cap, found)` links, numbered in page order.
    pub refs: Vec<ImageReference>,
}

/// Extract, filter, optionally de-duplicate, then cap.
///
/// De-duplication happens before the cap so that `cap` counts distinct
/// images.
pub fn extract_refs(markup: &str, page_url: &str, config: &PipelineConfig, cap: usize) -> ExtractedLinks {
    let attrs: Vec<&str> = config.src_attributes.iter().map(String::as_str).collect();
    let page_host = Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));
    let keep = |url: &str| link_matches(&config.link_filter, url, page_host.as_deref());

    let mut seen = HashSet::new();
    let links: Vec<String> = extract_with(markup, page_url, &attrs, Some(&keep))
        .into_iter()
        .filter(|url| !config.dedupe_links || seen.insert(url.clone()))
        .collect();

    let found = links.len();
    let refs: Vec<ImageReference> = links
        .into_iter()
        .take(cap)
        .enumerate()
        .map(|(origin_index, url)| ImageReference { url, origin_index })
        .collect();

    debug!("Extracted {} links, keeping {}", found, refs.len());
    ExtractedLinks { found, refs }
}

/// Whether a normalised link passes `filter`.
pub fn link_matches(filter: &LinkFilter, url: &str, page_host: Option<&str>) -> bool {
    if url.is_empty() {
        return false;
    }

    let parsed = Url::parse(url).ok();

    if filter.http_only {
        match &parsed {
            Some(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => return false,
        }
    }

    if filter.same_host {
        let host = parsed
            .as_ref()
            .and_then(|u| u.host_str())
            .map(|h| h.to_ascii_lowercase());
        if host.is_none() || host.as_deref() != page_host {
            return false;
        }
    }

    if !filter.extensions.is_empty() {
        let path = parsed
            .as_ref()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| url.split(['?', '#']).next().unwrap_or("").to_string());
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !filter.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            return false;
        }
    }

    true
}

/// Raw source values of every `<img>`, in document order. For each element
/// the first non-empty attribute in `attrs` wins; elements with none are skipped.
fn collect_sources(markup: &str, attrs: &[&str]) -> Vec<String> {
    let document = Html::parse_document(markup);
    document
        .select(&IMG)
        .filter_map(|el| {
            attrs
                .iter()
                .filter_map(|a| el.value().attr(a))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://h/gallery/42";

    fn page(imgs: &[&str]) -> String {
        let body: String = imgs.iter().map(|i| format!("<p>{i}</p>")).collect();
        format!("<html><head><title>t</title></head><body>{body}</body></html>")
    }

    #[test]
    fn extract_normalises_in_document_order() {
        let html = page(&[
            r#"<img src="//h/a.jpg">"#,
            r#"<img src="/b.png">"#,
            r#"<img src="https://other/c.gif">"#,
        ]);
        assert_eq!(
            extract(&html, PAGE, None),
            vec!["https://h/a.jpg", "https://h/b.png", "https://other/c.gif"]
        );
    }

    #[test]
    fn extract_skips_img_without_src() {
        let html = page(&[r#"<img alt="x">"#, r#"<img src="">"#, r#"<img src="/a.jpg">"#]);
        assert_eq!(extract(&html, PAGE, None), vec!["https://h/a.jpg"]);
    }

    #[test]
    fn extract_applies_predicate() {
        let html = page(&[r#"<img src="/a.jpg">"#, r#"<img src="/b.svg">"#]);
        let only_jpg = |u: &str| u.ends_with(".jpg");
        assert_eq!(extract(&html, PAGE, Some(&only_jpg)), vec!["https://h/a.jpg"]);
    }

    #[test]
    fn extract_with_prefers_earlier_attributes() {
        let html = page(&[
            r#"<img src="/spinner.gif" data-src="/a.jpg">"#,
            r#"<img src="/b.jpg">"#,
        ]);
        assert_eq!(
            extract_with(&html, PAGE, &["data-src", "src"], None),
            vec!["https://h/a.jpg", "https://h/b.jpg"]
        );
    }

    #[test]
    fn extract_on_empty_page_is_empty() {
        assert!(extract("<html></html>", PAGE, None).is_empty());
        assert!(extract("", PAGE, None).is_empty());
    }

    #[test]
    fn refs_are_capped_and_numbered() {
        let imgs: Vec<String> = (0..10).map(|i| format!(r#"<img src="/{i}.jpg">"#)).collect();
        let imgs: Vec<&str> = imgs.iter().map(String::as_str).collect();
        let html = page(&imgs);

        let out = extract_refs(&html, PAGE, &PipelineConfig::default(), 3);
        assert_eq!(out.found, 10);
        assert_eq!(out.refs.len(), 3);
        assert_eq!(out.refs[0].url, "https://h/0.jpg");
        assert_eq!(out.refs[2].origin_index, 2);
    }

    #[test]
    fn dedupe_happens_before_cap() {
        let html = page(&[
            r#"<img src="/a.jpg">"#,
            r#"<img src="/a.jpg">"#,
            r#"<img src="/b.jpg">"#,
        ]);
        let out = extract_refs(&html, PAGE, &PipelineConfig::default(), 2);
        assert_eq!(out.found, 2);
        let urls: Vec<_> = out.refs.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://h/a.jpg", "https://h/b.jpg"]);

        let keep_dupes = PipelineConfig::builder().dedupe_links(false).build().unwrap();
        let out = extract_refs(&html, PAGE, &keep_dupes, 2);
        assert_eq!(out.found, 3);
        assert_eq!(out.refs[1].url, "https://h/a.jpg");
    }

    #[test]
    fn default_filter_drops_data_uris_and_relative_paths() {
        let html = page(&[
            r#"<img src="data:image/png;base64,AAAA">"#,
            r#"<img src="thumbs/a.jpg">"#,
            r#"<img src="/ok.jpg">"#,
        ]);
        let out = extract_refs(&html, PAGE, &PipelineConfig::default(), 10);
        assert_eq!(out.found, 1);
        assert_eq!(out.refs[0].url, "https://h/ok.jpg");
    }

    #[test]
    fn lazy_attribute_takes_priority() {
        let html = page(&[r#"<img src="/spinner.gif" data-src="/real.jpg">"#]);
        let config = PipelineConfig::builder()
            .src_attributes(["data-src", "src"])
            .build()
            .unwrap();
        let out = extract_refs(&html, PAGE, &config, 10);
        assert_eq!(out.refs[0].url, "https://h/real.jpg");
    }

    #[test]
    fn same_host_filter() {
        let filter = LinkFilter {
            same_host: true,
            ..LinkFilter::default()
        };
        assert!(link_matches(&filter, "https://H/a.jpg", Some("h")));
        assert!(!link_matches(&filter, "https://cdn/a.jpg", Some("h")));
    }

    #[test]
    fn extension_filter_ignores_query() {
        let filter = LinkFilter {
            extensions: LinkFilter::image_extensions(),
            ..LinkFilter::default()
        };
        assert!(link_matches(&filter, "https://h/a.JPG?w=200", None));
        assert!(!link_matches(&filter, "https://h/pixel.php?id=1", None));
        assert!(!link_matches(&filter, "https://h/noext", None));
    }
}
