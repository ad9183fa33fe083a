//! Hypercat Smoke Harness
//!
//! Installs and activates the offline worker against the live network, then
//! replays a short browsing session through the interceptor and prints a JSON
//! summary of where each response came from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hypercat_common::{init_logging, LogConfig};
use hypercat_net::{HttpFetcher, LoaderConfig, Request, RequestInterceptor, ResponseSource};
use hypercat_sw::{CacheConfig, CacheStorage, MemoryCacheStorage, Registration, WorkerContext};
use serde_json::json;
use tracing::{error, info};

const GALLERY: &str = "https://hypercat.me/poses/";

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging(LogConfig::default().with_filter("hypercat_sw=debug,hypercat_net=debug,info")) {
        eprintln!("logging disabled: {}", e);
    }

    match run().await {
        Ok(summary) => println!("{}", summary),
        Err(e) => {
            error!(error = %e, "Smoke run failed");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let network = Arc::new(HttpFetcher::new(LoaderConfig {
        default_timeout: Duration::from_secs(15),
        ..Default::default()
    })?);
    let storage = Arc::new(MemoryCacheStorage::new());
    let (context, _events) = WorkerContext::new(storage.clone(), network.clone());
    let registration = Arc::new(Registration::new(context));

    let config = CacheConfig::default();
    let precache = config.precache.clone();

    let started = Instant::now();
    let outcome = registration.update(config).await?;
    info!(elapsed = ?started.elapsed(), "Worker ready");

    let mut interceptor = RequestInterceptor::new(network);
    interceptor.set_handler(registration.clone());

    let mut requests = Vec::new();
    let session = [
        Request::get(GALLERY).accept("text/html"),
        Request::get(precache.first().cloned().unwrap_or_default()),
        Request::get(GALLERY).accept("text/html"),
    ];
    for request in session {
        let url = request.url.clone();
        let started = Instant::now();
        match interceptor.dispatch(request).await {
            Ok(intercepted) => {
                let source = match intercepted.source {
                    ResponseSource::Handler => "worker",
                    ResponseSource::Network => "network",
                };
                let status = intercepted.response.status;
                let bytes = intercepted.response.bytes().await.map(|b| b.len()).unwrap_or(0);
                let settled = intercepted.pending.settle().await;
                requests.push(json!({
                    "url": url,
                    "status": status,
                    "source": source,
                    "bytes": bytes,
                    "background_tasks": settled.completed,
                    "elapsed_ms": started.elapsed().as_millis() as u64,
                }));
            }
            Err(e) => requests.push(json!({ "url": url, "error": e.to_string() })),
        }
    }

    let mut caches = serde_json::Map::new();
    for name in storage.keys().await? {
        let entries = storage.entries(&name).await?.len();
        caches.insert(name, json!(entries));
    }

    Ok(json!({
        "worker": outcome.worker_id.raw(),
        "precached": outcome.install.cached,
        "precache_failures": outcome
            .install
            .failed
            .iter()
            .map(|(url, reason)| json!({ "url": url, "reason": reason }))
            .collect::<Vec<_>>(),
        "stale_deleted": outcome.activation.map(|a| a.deleted).unwrap_or_default(),
        "requests": requests,
        "caches": caches,
    }))
}
