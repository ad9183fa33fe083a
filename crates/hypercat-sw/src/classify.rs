//! Request classification.
//!
//! Rules are checked in order and the first match wins.

use http::Method;
use hypercat_net::Request;
use tracing::trace;

use crate::config::CacheConfig;

/// What kind of request the engine is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClassification {
    /// Not GET, not http(s), or an unparsable URL.
    Ignored,
    /// Same-origin gallery image under the content prefix.
    PoseImage,
    /// Stylesheet or script, from any origin.
    StaticAsset,
    /// Page navigation (`Accept` includes `text/html`).
    HtmlPage,
    /// Anything else.
    Unclassified,
}

/// Classify a request. Pure and deterministic.
pub fn classify(request: &Request, config: &CacheConfig) -> RequestClassification {
    let class = classify_inner(request, config);
    trace!(url = %request.url, class = ?class, "Classified request");
    class
}

fn classify_inner(request: &Request, config: &CacheConfig) -> RequestClassification {
    if request.method != Method::GET {
        return RequestClassification::Ignored;
    }
    if !has_http_scheme(&request.url) {
        return RequestClassification::Ignored;
    }
    let url = match request.parse_url() {
        Ok(url) => url,
        Err(_) => return RequestClassification::Ignored,
    };

    // `path()` excludes the query string.
    let path = url.path();
    let extension = path_extension(path);

    if url.origin().ascii_serialization() == config.origin
        && path.starts_with(&config.content_prefix)
        && extension.is_some_and(|ext| matches_any(ext, &config.image_extensions))
    {
        return RequestClassification::PoseImage;
    }

    if extension.is_some_and(|ext| matches_any(ext, &config.asset_extensions)) {
        return RequestClassification::StaticAsset;
    }

    if request
        .accept_header()
        .is_some_and(|accept| accept.contains("text/html"))
    {
        return RequestClassification::HtmlPage;
    }

    RequestClassification::Unclassified
}

fn has_http_scheme(raw: &str) -> bool {
    let lower = |n: usize| raw.get(..n).map(str::to_ascii_lowercase);
    lower(5).as_deref() == Some("http:") || lower(6).as_deref() == Some("https:")
}

/// Extension of the last path segment, if it has one.
fn path_extension(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

fn matches_any(ext: &str, set: &[String]) -> bool {
    set.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_of(request: Request) -> RequestClassification {
        classify(&request, &CacheConfig::default())
    }

    #[test]
    fn test_non_get_is_ignored() {
        let request = Request::new(Method::POST, "https://hypercat.me/poses/a.webp");
        assert_eq!(class_of(request), RequestClassification::Ignored);
    }

    #[test]
    fn test_non_http_scheme_is_ignored() {
        assert_eq!(
            class_of(Request::get("chrome-extension://abc/script.js")),
            RequestClassification::Ignored
        );
        assert_eq!(
            class_of(Request::get("data:text/css,body{}")),
            RequestClassification::Ignored
        );
    }

    #[test]
    fn test_malformed_url_is_ignored() {
        assert_eq!(
            class_of(Request::get("not-a-valid-url")),
            RequestClassification::Ignored
        );
        assert_eq!(
            class_of(Request::get("https://")),
            RequestClassification::Ignored
        );
    }

    #[test]
    fn test_pose_images() {
        for ext in ["webp", "jpg", "jpeg", "png", "gif", "svg"] {
            let url = format!("https://hypercat.me/poses/sitting/cat.{}", ext);
            assert_eq!(class_of(Request::get(url)), RequestClassification::PoseImage);
        }
        assert_eq!(
            class_of(Request::get("https://hypercat.me/poses/cat.JPG?w=300")),
            RequestClassification::PoseImage
        );
    }

    #[test]
    fn test_images_outside_scope_are_not_cached() {
        // Wrong path prefix.
        assert_eq!(
            class_of(Request::get("https://hypercat.me/avatars/me.png")),
            RequestClassification::Unclassified
        );
        // Wrong origin.
        assert_eq!(
            class_of(Request::get("https://images.example.com/poses/cat.png")),
            RequestClassification::Unclassified
        );
        // Extension only in the query string.
        assert_eq!(
            class_of(Request::get("https://hypercat.me/poses/thumb?f=cat.png")),
            RequestClassification::Unclassified
        );
    }

    #[test]
    fn test_static_assets_any_origin() {
        assert_eq!(
            class_of(Request::get("https://hypercat.me/assets/site.css")),
            RequestClassification::StaticAsset
        );
        assert_eq!(
            class_of(Request::get(
                "https://cdnjs.cloudflare.com/ajax/libs/jquery/3.7.1/jquery.min.js?v=3"
            )),
            RequestClassification::StaticAsset
        );
    }

    #[test]
    fn test_asset_rule_precedes_html_rule() {
        let request = Request::get("https://hypercat.me/app.js").accept("text/html,*/*");
        assert_eq!(class_of(request), RequestClassification::StaticAsset);
    }

    #[test]
    fn test_html_pages() {
        let request = Request::get("https://hypercat.me/poses/")
            .accept("text/html,application/xhtml+xml;q=0.9");
        assert_eq!(class_of(request), RequestClassification::HtmlPage);
    }

    #[test]
    fn test_unclassified() {
        assert_eq!(
            class_of(Request::get("https://hypercat.me/api/feed.json").accept("application/json")),
            RequestClassification::Unclassified
        );
        assert_eq!(
            class_of(Request::get("https://hypercat.me/")),
            RequestClassification::Unclassified
        );
    }

    #[test]
    fn test_path_extension() {
        assert_eq!(path_extension("/poses/a.webp"), Some("webp"));
        assert_eq!(path_extension("/poses/archive.tar.gz"), Some("gz"));
        assert_eq!(path_extension("/poses/"), None);
        assert_eq!(path_extension("/poses/.hidden"), None);
        assert_eq!(path_extension("/v1.2/readme"), None);
    }
}
