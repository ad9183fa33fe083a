//! Caching strategies.
//!
//! Each strategy always produces a response for the page. Cache writes run as
//! background work registered on the event's [`WaitUntil`], so the page never
//! waits for them and their failures never reach it.

use std::sync::Arc;

use http::header::CONTENT_TYPE;
use hypercat_common::{with_timeout, WaitUntil};
use hypercat_net::{Fetcher, NetError, Request, Response, ResponseType};
use tracing::{debug, warn};

use crate::classify::RequestClassification;
use crate::config::{CacheConfig, CacheRole};
use crate::storage::CacheStorage;

/// Body of the last-resort page served when a navigation cannot be satisfied.
pub const OFFLINE_HTML: &str = "<!DOCTYPE html>\n\
<html lang=\"en\">\n\
<head><meta charset=\"utf-8\"><title>Offline</title></head>\n\
<body><h1>You are offline</h1><p>This page is not available offline yet. Reconnect and try again.</p></body>\n\
</html>\n";

/// Strategy applied to a classified request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from the cache; fetch and store on a miss.
    CacheFirst(CacheRole),
    /// Fetch; fall back to the cache, then to the offline page.
    NetworkFirst(CacheRole),
    /// Leave the request to default network handling.
    Passthrough,
}

impl From<RequestClassification> for Strategy {
    fn from(class: RequestClassification) -> Self {
        match class {
            RequestClassification::PoseImage => Strategy::CacheFirst(CacheRole::Runtime),
            RequestClassification::StaticAsset => Strategy::CacheFirst(CacheRole::Static),
            RequestClassification::HtmlPage => Strategy::NetworkFirst(CacheRole::Runtime),
            RequestClassification::Ignored | RequestClassification::Unclassified => {
                Strategy::Passthrough
            }
        }
    }
}

/// Response for a cache-first request that can reach neither cache nor network.
pub fn service_unavailable() -> Response {
    Response::empty(503)
        .with_status_text("Service Unavailable")
        .with_type(ResponseType::Synthetic)
}

/// Minimal page for a navigation that can reach neither network nor cache.
pub fn offline_page() -> Response {
    Response::new(200, OFFLINE_HTML)
        .with_header(CONTENT_TYPE, "text/html; charset=utf-8")
        .with_type(ResponseType::Synthetic)
}

/// Runs caching strategies against shared storage and network.
#[derive(Clone)]
pub struct StrategyExecutor {
    config: Arc<CacheConfig>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetcher>,
}

impl StrategyExecutor {
    pub fn new(
        config: Arc<CacheConfig>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            network,
        }
    }

    /// Run a strategy. `None` means the request is passed through.
    pub async fn execute(
        &self,
        strategy: Strategy,
        request: &Request,
        wait_until: &WaitUntil,
    ) -> Option<Response> {
        match strategy {
            Strategy::CacheFirst(role) => {
                let cache = self.config.cache_name(role);
                Some(self.cache_first(&cache, request, wait_until).await)
            }
            Strategy::NetworkFirst(role) => {
                let cache = self.config.cache_name(role);
                Some(self.network_first(&cache, request, wait_until).await)
            }
            Strategy::Passthrough => None,
        }
    }

    /// Cache-first: a hit never touches the network.
    pub async fn cache_first(
        &self,
        cache_name: &str,
        request: &Request,
        wait_until: &WaitUntil,
    ) -> Response {
        if let Some(cached) = self.lookup(cache_name, request).await {
            debug!(url = %request.url, cache = cache_name, "Cache hit");
            return cached;
        }
        debug!(url = %request.url, cache = cache_name, "Cache miss, fetching");

        let response = match self.fetch_network(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network failed on cache miss");
                return service_unavailable();
            }
        };

        if !is_cacheable(&response) {
            debug!(url = %request.url, status = response.status, "Not caching response");
            return response;
        }

        match self.store_copy(cache_name, request, response, wait_until).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Response body failed");
                service_unavailable()
            }
        }
    }

    /// Network-first: prefer fresh pages, then the cache, then the offline page.
    pub async fn network_first(
        &self,
        cache_name: &str,
        request: &Request,
        wait_until: &WaitUntil,
    ) -> Response {
        let failure = match self.fetch_network(request).await {
            Ok(response) if response.ok() => {
                match self.store_copy(cache_name, request, response, wait_until).await {
                    Ok(response) => return response,
                    Err(e) => e,
                }
            }
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "Not caching response");
                return response;
            }
            Err(e) => e,
        };
        warn!(url = %request.url, error = %failure, "Network failed, trying cache");

        match self.lookup(cache_name, request).await {
            Some(cached) => {
                debug!(url = %request.url, cache = cache_name, "Serving cached page");
                cached
            }
            None => {
                debug!(url = %request.url, "Serving offline page");
                offline_page()
            }
        }
    }

    /// Fetch, bounded by the configured timeout.
    async fn fetch_network(&self, request: &Request) -> Result<Response, NetError> {
        match self.config.fetch_timeout {
            Some(limit) => with_timeout(limit, self.network.fetch(request)).await?,
            None => self.network.fetch(request).await,
        }
    }

    /// Look up a request; storage errors count as a miss.
    async fn lookup(&self, cache_name: &str, request: &Request) -> Option<Response> {
        match self.storage.match_request(cache_name, request).await {
            Ok(found) => found,
            Err(e) => {
                warn!(url = %request.url, cache = cache_name, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Split the response, hand one half to a background write, return the other.
    async fn store_copy(
        &self,
        cache_name: &str,
        request: &Request,
        response: Response,
        wait_until: &WaitUntil,
    ) -> Result<Response, NetError> {
        let (page, copy) = response.tee().await?;

        let storage = Arc::clone(&self.storage);
        let cache_name = cache_name.to_string();
        let request = request.clone();
        wait_until.wait_until(async move {
            match storage.put(&cache_name, &request, copy).await {
                Ok(()) => debug!(url = %request.url, cache = %cache_name, "Cached response"),
                Err(e) => {
                    warn!(url = %request.url, cache = %cache_name, error = %e, "Cache write failed")
                }
            }
        });

        Ok(page)
    }
}

/// Ok status, or opaque (status hidden but replayable).
fn is_cacheable(response: &Response) -> bool {
    response.ok() || response.is_opaque()
}
