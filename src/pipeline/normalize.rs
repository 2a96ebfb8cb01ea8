//! URL normalisation: turn a raw `src` value into something fetchable.
//!
//! Galleries mix three spellings of the same link: scheme-relative
//! (`//cdn/x.jpg`), root-relative (`/x.jpg`) and absolute. Only the first two
//! need the page URL to be resolved. Anything else is returned untouched and
//! left for the link filter or the fetcher to reject.

use reqwest::Url;

/// Resolve `src` against `page_url`.
///
/// * `//host/x` gets the page's scheme (`https:` when the page URL does not parse).
/// * `/x` gets the page's `scheme://host[:port]`.
/// * everything else is returned unchanged.
///
/// Pure and infallible: worst case the result is a string the fetcher will
/// refuse as an invalid URL.
pub fn normalize(src: &str, page_url: &str) -> String {
    let src = src.trim();
    let parsed = Url::parse(page_url).ok();

    if src.starts_with("//") {
        let scheme = parsed.as_ref().map(|u| u.scheme()).unwrap_or("https");
        return format!("{scheme}:{src}");
    }

    if src.starts_with('/') {
        return format!("{}{}", origin(parsed.as_ref(), page_url), src);
    }

    src.to_string()
}

/// `scheme://host[:port]` of the page.
fn origin(parsed: Option<&Url>, page_url: &str) -> String {
    if let Some(url) = parsed {
        if let Some(host) = url.host_str() {
            return match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            };
        }
    }

    // Unparseable page URL: keep the first three '/'-separated segments,
    // which is `scheme://host` for anything URL-shaped.
    page_url.split('/').take(3).collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_relative_takes_page_scheme() {
        assert_eq!(normalize("//h/x.jpg", "https://h/page"), "https://h/x.jpg");
        assert_eq!(normalize("//cdn/x.jpg", "http://h/page"), "http://cdn/x.jpg");
    }

    #[test]
    fn scheme_relative_defaults_to_https() {
        assert_eq!(normalize("//cdn/x.jpg", "not a url"), "https://cdn/x.jpg");
    }

    #[test]
    fn root_relative_keeps_port() {
        assert_eq!(
            normalize("/x.jpg", "https://h:8080/page"),
            "https://h:8080/x.jpg"
        );
        assert_eq!(
            normalize("/a/b.png?w=1", "http://h/gallery/1"),
            "http://h/a/b.png?w=1"
        );
    }

    #[test]
    fn absolute_is_unchanged() {
        assert_eq!(
            normalize("https://other/x.jpg", "https://h/page"),
            "https://other/x.jpg"
        );
    }

    #[test]
    fn relative_path_is_unchanged() {
        assert_eq!(normalize("img/x.jpg", "https://h/page"), "img/x.jpg");
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(normalize("  /x.jpg\n", "https://h/"), "https://h/x.jpg");
    }

    #[test]
    fn root_relative_with_unparseable_page() {
        assert_eq!(normalize("/x.jpg", "weird://h/p/q"), "weird://h/x.jpg");
    }
}
