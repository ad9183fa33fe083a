//! Worker lifecycle: state machine, install-time precaching, and
//! activation-time cleanup of stale cache generations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use hypercat_common::{retry_if, with_timeout};
use hypercat_net::{Fetcher, NetError, Request};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::storage::CacheStorage;
use crate::SwError;

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Precaching.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Purging stale generations.
    Activating,
    /// Handling fetches and controlling pages.
    Activated,
    /// Replaced or discarded.
    Redundant,
}

impl WorkerState {
    /// Whether `next` directly follows `self`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
        ) || (next == Redundant && self != Redundant)
    }
}

/// State plus bookkeeping for one worker.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: WorkerState,
    changed_at: Instant,
    skip_waiting: bool,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: WorkerState::Parsed,
            changed_at: Instant::now(),
            skip_waiting: false,
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: WorkerState) -> Result<(), SwError> {
        if !self.state.can_transition_to(next) {
            return Err(SwError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.changed_at = Instant::now();
        Ok(())
    }

    pub(crate) fn request_skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    pub(crate) fn skip_waiting(&self) -> bool {
        self.skip_waiting
    }

    pub(crate) fn since_change(&self) -> Duration {
        self.changed_at.elapsed()
    }
}

/// Outcome of precaching the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// URLs stored in the static generation.
    pub cached: Vec<String>,
    /// URLs that could not be stored, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Outcome of activation cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale generations removed.
    pub deleted: Vec<String>,
    /// Stale generations that could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Pages now controlled by the activated worker.
    pub claimed: usize,
}

/// Fetch and store every manifest entry independently.
///
/// A failing entry is logged and reported; it never affects the others.
pub async fn precache(
    config: &CacheConfig,
    storage: &dyn CacheStorage,
    network: &dyn Fetcher,
) -> InstallReport {
    let cache_name = config.static_cache_name();
    if let Err(e) = storage.open(&cache_name).await {
        // Each put below creates the cache on its own.
        warn!(cache = %cache_name, error = %e, "Failed to open static cache");
    }

    let attempts = config.precache.iter().map(|url| {
        let cache_name = cache_name.as_str();
        async move {
            let outcome = retry_if(
                &config.precache_retry,
                || precache_one(config, storage, network, cache_name, url),
                SwError::is_retryable,
            )
            .await;
            (url.clone(), outcome)
        }
    });

    let mut report = InstallReport::default();
    for (url, outcome) in join_all(attempts).await {
        match outcome {
            Ok(()) => {
                debug!(url = %url, "Precached");
                report.cached.push(url);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to precache");
                report.failed.push((url, e.to_string()));
            }
        }
    }
    report
}

async fn precache_one(
    config: &CacheConfig,
    storage: &dyn CacheStorage,
    network: &dyn Fetcher,
    cache_name: &str,
    url: &str,
) -> Result<(), SwError> {
    let request = Request::get(url);
    let response = match config.fetch_timeout {
        Some(limit) => with_timeout(limit, network.fetch(&request))
            .await
            .map_err(NetError::from)??,
        None => network.fetch(&request).await?,
    };
    if !response.ok() {
        return Err(SwError::BadStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    storage.put(cache_name, &request, response).await
}

/// Delete every owned cache that is not a current generation.
///
/// Deletions run concurrently; a failure is logged and reported.
pub async fn purge_stale_generations(
    config: &CacheConfig,
    storage: &dyn CacheStorage,
) -> ActivateReport {
    let mut report = ActivateReport::default();

    let names = match storage.keys().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "Failed to list caches; skipping cleanup");
            return report;
        }
    };

    let stale: Vec<String> = names.into_iter().filter(|n| config.is_stale(n)).collect();
    let deletions = stale.iter().map(|name| async move { (name, storage.delete(name).await) });

    for (name, outcome) in join_all(deletions).await {
        match outcome {
            Ok(_) => {
                info!(cache = %name, "Deleted stale cache generation");
                report.deleted.push(name.clone());
            }
            Err(e) => {
                warn!(cache = %name, error = %e, "Failed to delete stale cache");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCacheStorage;
    use hypercat_common::RetryConfig;

    #[test]
    fn test_forward_transitions() {
        let mut lifecycle = Lifecycle::new();
        for next in [
            WorkerState::Installing,
            WorkerState::Installed,
            WorkerState::Activating,
            WorkerState::Activated,
        ] {
            lifecycle.transition(next).unwrap();
        }
        assert_eq!(lifecycle.state(), WorkerState::Activated);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle.transition(WorkerState::Activated).unwrap_err();
        assert!(matches!(
            err,
            SwError::InvalidState {
                from: WorkerState::Parsed,
                to: WorkerState::Activated
            }
        ));

        lifecycle.transition(WorkerState::Redundant).unwrap();
        assert!(lifecycle.transition(WorkerState::Redundant).is_err());
        assert!(lifecycle.transition(WorkerState::Installing).is_err());
    }

    #[test]
    fn test_skip_waiting_flag() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.skip_waiting());
        lifecycle.request_skip_waiting();
        assert!(lifecycle.skip_waiting());
        assert!(lifecycle.since_change() < Duration::from_secs(60));
    }

    struct FlakyNetwork {
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl Fetcher for FlakyNetwork {
        async fn fetch(&self, _request: &Request) -> Result<hypercat_net::Response, NetError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(NetError::RequestFailed("connection reset".into()))
            } else {
                Ok(hypercat_net::Response::new(200, "lib"))
            }
        }
    }

    #[tokio::test]
    async fn test_precache_retries_transient_failure() {
        let storage = MemoryCacheStorage::new();
        let network = FlakyNetwork {
            calls: AtomicU64::new(0),
        };
        let config = CacheConfig::default()
            .with_precache(["https://cdn.example.com/lib.js"])
            .with_precache_retry(RetryConfig {
                initial_delay: Duration::from_millis(1),
                jitter: false,
                ..RetryConfig::none().with_max_attempts(2)
            });

        let report = precache(&config, &storage, &network).await;
        assert_eq!(report.cached, vec!["https://cdn.example.com/lib.js"]);
        assert_eq!(network.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_precache_without_retry_reports_failure() {
        let storage = MemoryCacheStorage::new();
        let network = FlakyNetwork {
            calls: AtomicU64::new(0),
        };
        let config = CacheConfig::default().with_precache(["https://cdn.example.com/lib.js"]);

        let report = precache(&config, &storage, &network).await;
        assert!(report.cached.is_empty());
        assert_eq!(report.failed.len(), 1);
        // The static generation exists even when nothing landed in it.
        assert!(storage.has("hypercat-static-v1").await.unwrap());
    }

    struct MissingAsset {
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl Fetcher for MissingAsset {
        async fn fetch(&self, _request: &Request) -> Result<hypercat_net::Response, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(hypercat_net::Response::new(404, ""))
        }
    }

    #[tokio::test]
    async fn test_precache_does_not_retry_error_status() {
        let storage = MemoryCacheStorage::new();
        let network = MissingAsset {
            calls: AtomicU64::new(0),
        };
        let config = CacheConfig::default()
            .with_precache(["https://cdn.example.com/gone.js"])
            .with_precache_retry(RetryConfig {
                initial_delay: Duration::from_millis(1),
                jitter: false,
                ..RetryConfig::none().with_max_attempts(3)
            });

        let report = precache(&config, &storage, &network).await;
        assert!(report.cached.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("404"));
        assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_current_and_foreign_caches() {
        let storage = MemoryCacheStorage::new();
        for name in [
            "hypercat-static-v1",
            "hypercat-runtime-v1",
            "hypercat-static-v2",
            "unrelated",
        ] {
            storage.open(name).await.unwrap();
        }

        let config = CacheConfig::default().with_version("v2");
        let report = purge_stale_generations(&config, &storage).await;

        let mut deleted = report.deleted.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["hypercat-runtime-v1", "hypercat-static-v1"]);
        assert!(report.failed.is_empty());
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["hypercat-static-v2", "unrelated"]
        );
    }

    #[test]
    fn test_worker_ids_unique() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }
}
