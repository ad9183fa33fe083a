//! Engine configuration and cache generation naming.
//!
//! One [`CacheConfig`] is built at startup and shared read-only by every
//! event handler.

use std::fmt;
use std::time::Duration;

use hypercat_common::{HypercatError, RetryConfig};
use url::Url;

/// Prefix shared by every cache this engine owns.
pub const DEFAULT_NAMESPACE: &str = "hypercat-";

/// Bumped whenever cache handling changes, forcing fresh generations.
pub const DEFAULT_VERSION: &str = "v1";

/// Origin of the site the engine serves.
pub const DEFAULT_ORIGIN: &str = "https://hypercat.me";

/// Path prefix of gallery content eligible for image caching.
pub const DEFAULT_CONTENT_PREFIX: &str = "/poses/";

/// Extensions treated as gallery images.
pub const IMAGE_EXTENSIONS: &[&str] = &["webp", "jpg", "jpeg", "png", "gif", "svg"];

/// Extensions treated as static assets.
pub const ASSET_EXTENSIONS: &[&str] = &["css", "js"];

/// Third-party libraries the gallery page needs offline.
pub const PRECACHE_URLS: &[&str] = &[
    "https://cdnjs.cloudflare.com/ajax/libs/justifiedGallery/3.8.1/css/justifiedGallery.min.css",
    "https://cdnjs.cloudflare.com/ajax/libs/glightbox/3.3.1/css/glightbox.min.css",
    "https://cdnjs.cloudflare.com/ajax/libs/jquery/3.7.1/jquery.min.js",
    "https://cdnjs.cloudflare.com/ajax/libs/justifiedGallery/3.8.1/js/jquery.justifiedGallery.min.js",
    "https://cdnjs.cloudflare.com/ajax/libs/glightbox/3.3.1/js/glightbox.min.js",
];

/// Role of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheRole {
    /// Library and app-shell assets.
    Static,
    /// Pages and images cached as they are visited.
    Runtime,
}

impl CacheRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::Static => "static",
            CacheRole::Runtime => "runtime",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(CacheRole::Static),
            "runtime" => Some(CacheRole::Runtime),
            _ => None,
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned cache partition, named `{namespace}{role}-{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheGeneration {
    pub role: CacheRole,
    pub version: String,
}

impl CacheGeneration {
    pub fn new(role: CacheRole, version: impl Into<String>) -> Self {
        Self {
            role,
            version: version.into(),
        }
    }

    /// Storage name under the given namespace.
    pub fn name(&self, namespace: &str) -> String {
        format!("{}{}-{}", namespace, self.role, self.version)
    }

    /// Recover a generation from a storage name, if it belongs to `namespace`.
    pub fn parse(namespace: &str, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(namespace)?;
        let (role, version) = rest.split_once('-')?;
        if version.is_empty() {
            return None;
        }
        Some(Self::new(CacheRole::parse(role)?, version))
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix marking caches owned by this engine.
    pub namespace: String,
    /// Current version tag.
    pub version: String,
    /// Page origin, serialized (`scheme://host[:port]`).
    pub origin: String,
    /// Gallery path prefix; must start and end with `/`.
    pub content_prefix: String,
    /// Lowercase image extensions.
    pub image_extensions: Vec<String>,
    /// Lowercase asset extensions.
    pub asset_extensions: Vec<String>,
    /// Absolute URLs fetched into the static generation on install.
    pub precache: Vec<String>,
    /// Upper bound on any network fetch the engine makes. `None` waits forever.
    pub fetch_timeout: Option<Duration>,
    /// Retry policy for each precache entry.
    pub precache_retry: RetryConfig,
    /// Activate immediately after install instead of waiting for old pages to close.
    pub skip_waiting: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: DEFAULT_VERSION.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            content_prefix: DEFAULT_CONTENT_PREFIX.to_string(),
            image_extensions: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            asset_extensions: ASSET_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            precache: PRECACHE_URLS.iter().map(|s| s.to_string()).collect(),
            fetch_timeout: Some(Duration::from_secs(30)),
            precache_retry: RetryConfig::none(),
            skip_waiting: true,
        }
    }
}

impl CacheConfig {
    /// Set the version tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the page origin.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Replace the precache manifest.
    pub fn with_precache<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the precache retry policy.
    pub fn with_precache_retry(mut self, retry: RetryConfig) -> Self {
        self.precache_retry = retry;
        self
    }

    /// Choose whether install skips the waiting phase.
    pub fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }

    /// Current generation for a role.
    pub fn generation(&self, role: CacheRole) -> CacheGeneration {
        CacheGeneration::new(role, self.version.clone())
    }

    /// Storage name of the current generation for a role.
    pub fn cache_name(&self, role: CacheRole) -> String {
        self.generation(role).name(&self.namespace)
    }

    pub fn static_cache_name(&self) -> String {
        self.cache_name(CacheRole::Static)
    }

    pub fn runtime_cache_name(&self) -> String {
        self.cache_name(CacheRole::Runtime)
    }

    /// Whether a cache name carries this engine's namespace.
    pub fn owns(&self, cache_name: &str) -> bool {
        cache_name.starts_with(&self.namespace)
    }

    /// Whether an owned cache is stale for the current version.
    pub fn is_stale(&self, cache_name: &str) -> bool {
        self.owns(cache_name)
            && cache_name != self.static_cache_name()
            && cache_name != self.runtime_cache_name()
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), HypercatError> {
        if self.namespace.is_empty() {
            return Err(HypercatError::config("namespace must not be empty"));
        }
        if self.version.is_empty() || self.version.contains('-') {
            return Err(HypercatError::config(format!(
                "version tag {:?} must be non-empty and contain no '-'",
                self.version
            )));
        }
        if !self.content_prefix.starts_with('/') || !self.content_prefix.ends_with('/') {
            return Err(HypercatError::config(format!(
                "content prefix {:?} must start and end with '/'",
                self.content_prefix
            )));
        }

        let origin = Url::parse(&self.origin)
            .map_err(|e| HypercatError::config(format!("origin {:?}: {}", self.origin, e)))?;
        if !matches!(origin.scheme(), "http" | "https")
            || origin.origin().ascii_serialization() != self.origin
        {
            return Err(HypercatError::config(format!(
                "origin {:?} must be a bare http(s) origin",
                self.origin
            )));
        }

        for url in &self.precache {
            let parsed = Url::parse(url)
                .map_err(|e| HypercatError::config(format!("precache URL {:?}: {}", url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(HypercatError::config(format!(
                    "precache URL {:?} must be http(s)",
                    url
                )));
            }
        }

        Ok(())
    }
}
