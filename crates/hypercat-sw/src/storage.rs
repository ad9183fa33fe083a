//! Cache storage: named caches of request → response snapshots.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method};
use hypercat_net::{NetError, Request, Response, ResponseType};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::SwError;

/// Identity of a cached request: method plus URL without fragment.
///
/// Headers never participate in matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    pub fn from_request(request: &Request) -> Self {
        let url = match Url::parse(&request.url) {
            Ok(mut url) => {
                url.set_fragment(None);
                url.to_string()
            }
            Err(_) => request
                .url
                .split_once('#')
                .map(|(before, _)| before)
                .unwrap_or(&request.url)
                .to_string(),
        };

        Self {
            method: request.method.clone(),
            url,
        }
    }
}

/// Immutable copy of a response taken when it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub url: Option<Url>,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub body: Bytes,
}

impl CachedResponse {
    /// Read a response to completion and keep a copy of it.
    pub async fn snapshot(mut response: Response) -> Result<Self, NetError> {
        let url = response.url.take();
        let status = response.status;
        let status_text = std::mem::take(&mut response.status_text);
        let headers = std::mem::take(&mut response.headers);
        let response_type = response.response_type;
        let body = response.bytes().await?;

        Ok(Self {
            url,
            status,
            status_text,
            headers,
            response_type,
            body,
        })
    }

    /// Replay as a fresh response.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.status, self.body.clone())
            .with_status_text(self.status_text.clone())
            .with_type(self.response_type);
        response.headers = self.headers.clone();
        response.url = self.url.clone();
        response
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub response: CachedResponse,
}

/// Persistent named-cache facility.
///
/// Each call is atomic on its own; no transaction spans calls.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it doesn't exist.
    async fn open(&self, name: &str) -> Result<(), SwError>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool, SwError>;

    /// Look up a request in one cache.
    async fn match_request(&self, name: &str, request: &Request)
        -> Result<Option<Response>, SwError>;

    /// Store a response for a request, creating the cache if needed.
    /// An existing entry for the same request is replaced.
    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), SwError>;

    /// Delete a whole cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, SwError>;

    /// Names of all caches.
    async fn keys(&self) -> Result<Vec<String>, SwError>;

    /// Request keys stored in one cache.
    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, SwError>;
}

/// A single named cache.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    fn match_key(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    fn keys(&self) -> Vec<RequestKey> {
        self.entries.keys().cloned().collect()
    }
}

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
    /// Maximum entries across all caches.
    quota: Option<usize>,
}

impl MemoryCacheStorage {
    /// Create new, unbounded storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that rejects writes beyond `max_entries` in total.
    pub fn with_quota(max_entries: usize) -> Self {
        Self {
            caches: RwLock::default(),
            quota: Some(max_entries),
        }
    }

    /// Total number of stored entries.
    pub async fn len(&self) -> usize {
        self.caches
            .read()
            .await
            .values()
            .map(|c| c.entries.len())
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, SwError> {
        let key = RequestKey::from_request(request);
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .and_then(|cache| cache.match_key(&key))
            .map(|entry| entry.response.to_response()))
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), SwError> {
        let key = RequestKey::from_request(request);
        // Read the body before taking the lock.
        let snapshot = CachedResponse::snapshot(response).await?;

        let mut caches = self.caches.write().await;
        if let Some(limit) = self.quota {
            let replacing = caches
                .get(name)
                .is_some_and(|cache| cache.entries.contains_key(&key));
            let total: usize = caches.values().map(|c| c.entries.len()).sum();
            if !replacing && total >= limit {
                return Err(SwError::QuotaExceeded {
                    cache: name.to_string(),
                    limit,
                });
            }
        }

        trace!(cache = name, url = %key.url, "Storing entry");
        caches.entry(name.to_string()).or_default().put(CacheEntry {
            key,
            response: snapshot,
        });
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, SwError> {
        self.caches
            .read()
            .await
            .get(name)
            .map(Cache::keys)
            .ok_or_else(|| SwError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn test_request_key_ignores_fragment_and_headers() {
        let a = Request::get("https://hypercat.me/poses/#top").accept("text/html");
        let b = Request::get("https://hypercat.me/poses/");
        assert_eq!(RequestKey::from_request(&a), RequestKey::from_request(&b));
    }

    #[test]
    fn test_request_key_distinguishes_query() {
        let a = Request::get("https://cdn.example.com/lib.js?v=1");
        let b = Request::get("https://cdn.example.com/lib.js?v=2");
        assert_ne!(RequestKey::from_request(&a), RequestKey::from_request(&b));
    }

    #[tokio::test]
    async fn test_put_then_match() {
        let storage = MemoryCacheStorage::new();
        let request = Request::get("https://hypercat.me/poses/cat.webp");
        let response = Response::new(200, "pixels").with_header(CONTENT_TYPE, "image/webp");

        storage.put("hypercat-runtime-v1", &request, response).await.unwrap();

        let hit = storage
            .match_request("hypercat-runtime-v1", &request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.content_type(), Some("image/webp"));
        assert_eq!(hit.text().await.unwrap(), "pixels");
    }

    #[tokio::test]
    async fn test_match_is_scoped_to_cache() {
        let storage = MemoryCacheStorage::new();
        let request = Request::get("https://hypercat.me/app.css");
        storage
            .put("hypercat-static-v1", &request, Response::new(200, "body"))
            .await
            .unwrap();

        let miss = storage
            .match_request("hypercat-runtime-v1", &request)
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_entry() {
        let storage = MemoryCacheStorage::new();
        let request = Request::get("https://hypercat.me/");
        storage.put("c", &request, Response::new(200, "old")).await.unwrap();
        storage.put("c", &request, Response::new(200, "new")).await.unwrap();

        let hit = storage.match_request("c", &request).await.unwrap().unwrap();
        assert_eq!(hit.text().await.unwrap(), "new");
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_quota_rejects_new_entries() {
        let storage = MemoryCacheStorage::with_quota(1);
        let first = Request::get("https://hypercat.me/a.js");
        let second = Request::get("https://hypercat.me/b.js");

        storage.put("c", &first, Response::new(200, "a")).await.unwrap();
        let err = storage
            .put("c", &second, Response::new(200, "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, SwError::QuotaExceeded { limit: 1, .. }));

        // Replacing an existing key stays within quota.
        storage.put("c", &first, Response::new(200, "a2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_keys_delete() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("hypercat-static-v1").await.unwrap());

        storage.open("hypercat-static-v1").await.unwrap();
        storage.open("hypercat-runtime-v1").await.unwrap();
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["hypercat-runtime-v1", "hypercat-static-v1"]
        );

        assert!(storage.delete("hypercat-static-v1").await.unwrap());
        assert!(!storage.delete("hypercat-static-v1").await.unwrap());
        assert!(!storage.has("hypercat-static-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries() {
        let storage = MemoryCacheStorage::new();
        let request = Request::get("https://hypercat.me/poses/a.png#top");
        storage.put("c", &request, Response::new(200, "x")).await.unwrap();

        let keys = storage.entries("c").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].url, "https://hypercat.me/poses/a.png");
        assert!(matches!(
            storage.entries("missing").await,
            Err(SwError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_opaque_response_round_trips() {
        let storage = MemoryCacheStorage::new();
        let request = Request::get("https://cdn.example.com/lib.js");
        storage.put("c", &request, Response::opaque("js")).await.unwrap();

        let hit = storage.match_request("c", &request).await.unwrap().unwrap();
        assert!(hit.is_opaque());
        assert_eq!(hit.status, 0);
    }
}
