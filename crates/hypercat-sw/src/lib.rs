//! # Hypercat Offline Worker
//!
//! Request-interception cache engine that keeps the Hypercat gallery usable
//! offline.
//!
//! ## Features
//!
//! - **Classification**: every page request is sorted into ignored, pose image,
//!   static asset, HTML page, or unclassified
//! - **Strategies**: cache-first for images and assets, network-first with cache
//!   and offline-page fallback for HTML, passthrough for the rest
//! - **Lifecycle**: install precaches CDN libraries, activate purges stale cache
//!   generations and claims open pages
//! - **Graceful degradation**: the page always receives a valid response
//!
//! ## Architecture
//!
//! ```text
//! Registration (InterceptHandler)
//!     ├── waiting (OfflineWorker)
//!     └── active (OfflineWorker)
//!             ├── classify()         Request → RequestClassification
//!             ├── StrategyExecutor   cache-first / network-first
//!             └── lifecycle          install / activate
//!
//! CacheStorage
//!     ├── hypercat-static-{version}
//!     │       └── Request → CachedResponse
//!     └── hypercat-runtime-{version}
//! ```

use hypercat_common::HypercatError;
use hypercat_net::NetError;
use thiserror::Error;

pub mod classify;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod registration;
pub mod storage;
pub mod strategy;
pub mod worker;

pub use classify::{classify, RequestClassification};
pub use clients::{Client, Clients};
pub use config::{CacheConfig, CacheGeneration, CacheRole};
pub use lifecycle::{ActivateReport, InstallReport, WorkerId, WorkerState};
pub use registration::{Registration, UpdateOutcome};
pub use storage::{CacheStorage, CachedResponse, MemoryCacheStorage, RequestKey};
pub use strategy::{offline_page, service_unavailable, Strategy, StrategyExecutor};
pub use worker::{OfflineWorker, WorkerContext, WorkerEvent};

/// Errors that can occur in offline worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Quota exceeded: {cache} cannot hold more than {limit} entries")]
    QuotaExceeded { cache: String, limit: usize },

    #[error("Network error: {0}")]
    NetworkError(#[from] NetError),

    #[error("{url} answered {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidState { from: WorkerState, to: WorkerState },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Common(#[from] HypercatError),
}

impl SwError {
    /// Whether retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SwError::NetworkError(NetError::InvalidUrl(_)) => false,
            SwError::NetworkError(_) => true,
            SwError::Common(e) => e.is_retryable(),
            _ => false,
        }
    }
}
