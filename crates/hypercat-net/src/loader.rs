//! Network transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::{NetError, Request, Response, ResponseType};

/// Fetches a request from the network.
///
/// A returned `Err` means the fetch itself failed (DNS, connection, timeout).
/// HTTP error statuses are successful fetches.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Network loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout enforced by the HTTP client.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Capacity of the chunk channel for streamed bodies.
    pub body_buffer_chunks: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("hypercat-offline/", env!("CARGO_PKG_VERSION")).to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            body_buffer_chunks: 16,
        }
    }
}

/// Fetcher backed by a reqwest client.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(timeout = ?config.default_timeout, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    /// Loader configuration in use.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let url = request.parse_url()?;
        debug!(url = %url, method = %request.method, "Fetching from network");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let mut upstream = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.default_timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let final_url = upstream.url().clone();

        trace!(url = %final_url, status = %status, "Response headers received");

        // The body is forwarded chunk by chunk and can only be read once.
        let (tx, rx) = mpsc::channel(self.config.body_buffer_chunks.max(1));
        tokio::spawn(async move {
            loop {
                match upstream.chunk().await {
                    Ok(Some(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Body stream failed");
                        let _ = tx.send(Err(NetError::BodyRead(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        let mut response = Response::streaming(status.as_u16(), rx)
            .with_status_text(status.canonical_reason().unwrap_or(""))
            .with_type(ResponseType::Basic)
            .with_url(final_url);
        response.headers = headers;
        Ok(response)
    }
}
