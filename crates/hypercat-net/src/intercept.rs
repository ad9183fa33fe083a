//! Request interception: answer a page request locally or let it reach the network.

use std::sync::Arc;

use async_trait::async_trait;
use hypercat_common::{extendable, PendingWork, WaitUntil};
use tracing::{debug, trace};

use crate::{Fetcher, NetError, Request, Response};

/// Decision returned by an [`InterceptHandler`].
#[derive(Debug)]
pub enum InterceptAction {
    /// Not handled; the request goes to the network untouched.
    PassThrough,
    /// Answer the request with this response.
    Respond(Response),
}

/// Handler consulted for every outgoing page request.
#[async_trait]
pub trait InterceptHandler: Send + Sync {
    /// Decide how to answer `request`.
    ///
    /// Work that must finish after the response is returned (cache writes)
    /// is registered on `wait_until` rather than awaited.
    async fn intercept(&self, request: &Request, wait_until: &WaitUntil) -> InterceptAction;
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Produced by the handler (cache, network-and-cache, or synthetic).
    Handler,
    /// Default network handling.
    Network,
}

/// A dispatched request's response together with its background work.
#[derive(Debug)]
pub struct Intercepted {
    pub response: Response,
    pub source: ResponseSource,
    /// Background work the runtime must settle before dropping the event.
    pub pending: PendingWork,
}

/// Routes page requests through an optional handler before the network.
pub struct RequestInterceptor {
    handler: Option<Arc<dyn InterceptHandler>>,
    network: Arc<dyn Fetcher>,
}

impl RequestInterceptor {
    /// Create an interceptor with no handler installed.
    pub fn new(network: Arc<dyn Fetcher>) -> Self {
        Self {
            handler: None,
            network,
        }
    }

    /// Install the handler.
    pub fn set_handler(&mut self, handler: Arc<dyn InterceptHandler>) {
        self.handler = Some(handler);
    }

    /// Remove the handler; all requests then go straight to the network.
    pub fn clear_handler(&mut self) {
        self.handler = None;
    }

    /// Dispatch a page request.
    ///
    /// Only a passthrough request can fail: handler responses are always valid.
    pub async fn dispatch(&self, request: Request) -> Result<Intercepted, NetError> {
        trace!(url = %request.url, "Intercepting request");
        let (wait_until, pending) = extendable();

        if let Some(handler) = &self.handler {
            match handler.intercept(&request, &wait_until).await {
                InterceptAction::Respond(response) => {
                    debug!(url = %request.url, status = response.status, "Handler responded");
                    return Ok(Intercepted {
                        response,
                        source: ResponseSource::Handler,
                        pending,
                    });
                }
                InterceptAction::PassThrough => {
                    trace!(url = %request.url, "Handler passed request through");
                }
            }
        }

        let response = self.network.fetch(&request).await?;
        Ok(Intercepted {
            response,
            source: ResponseSource::Network,
            pending,
        })
    }
}
