//! # Hypercat Common
//!
//! Common utilities, error types, and logging configuration for the Hypercat
//! offline cache engine.
//!
//! ## Features
//!
//! - Unified error type with categories for logging
//! - Logging configuration and setup
//! - Retry and timeout utilities
//! - Background work handles for "respond now, persist later" tasks

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;
pub mod tasks;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_if, retry_with_backoff, with_timeout, RetryConfig};
pub use tasks::{extendable, PendingWork, SettleReport, WaitUntil};

/// Unified error type for Hypercat.
#[derive(Error, Debug)]
pub enum HypercatError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Logging could not be initialized.
    #[error("Logging error: {0}")]
    Logging(String),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl HypercatError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HypercatError::Network { .. } | HypercatError::Timeout(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            HypercatError::Network { .. } => "network",
            HypercatError::Cache { .. } => "cache",
            HypercatError::Config { .. } => "config",
            HypercatError::Logging(_) => "logging",
            HypercatError::Timeout(_) => "timeout",
        }
    }
}

/// Result type alias for Hypercat operations.
pub type Result<T> = std::result::Result<T, HypercatError>;
