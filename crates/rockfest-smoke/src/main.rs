//! Rockfest Smoke Harness
//!
//! Registers the offline worker against a live origin, replays a list of page
//! requests through it and prints a JSON summary of what was served from where.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rockfest_common::{init_logging, LogConfig, OptionExt, RockfestError};
use rockfest_net::{HttpFetcher, LoaderConfig, Request};
use rockfest_sw::{
    BuildProfile, CacheStorage, FestivalWorker, MemoryCacheStorage, PushPayload,
    ServiceWorkerContainer, ServiceWorkerHooks, WorkerConfig,
};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

/// Command line options.
struct Args {
    config: Option<String>,
    origin: Option<String>,
    push: Option<String>,
    paths: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut origin = None;
        let mut push = None;
        let mut paths = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config = args.next(),
                "--origin" => origin = args.next(),
                "--push" => push = args.next(),
                _ => paths.push(arg),
            }
        }

        if paths.is_empty() {
            paths = vec!["/".to_string(), "/api/bands".to_string()];
        }

        Self {
            config,
            origin,
            push,
            paths,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogConfig::from_env());

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(origin) = &args.origin {
        config.origin = Url::parse(origin).with_context(|| format!("invalid origin {origin}"))?;
    }
    info!(origin = %config.origin, paths = args.paths.len(), "Starting Rockfest smoke harness");

    let fetcher = HttpFetcher::new(LoaderConfig {
        origin: Some(config.origin.clone()),
        ..Default::default()
    })?;
    let caches = Arc::new(MemoryCacheStorage::new());
    let origin = config.origin.clone();
    let (worker, mut worker_events) =
        FestivalWorker::new(config, caches.clone(), Arc::new(fetcher)).map_err(RockfestError::from)?;

    let (container, mut container_events) = ServiceWorkerContainer::new(BuildProfile::Production);
    let scope = container
        .register(worker)
        .await
        .context("service worker registration failed")?;

    let mut fetches = Vec::new();
    for path in &args.paths {
        let url = origin.join(path).with_context(|| format!("invalid path {path}"))?;
        let start = Instant::now();
        let outcome = container.handle_fetch(Request::get(url.clone())).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let entry = match outcome {
            Some(Ok(response)) => json!({
                "url": url.as_str(),
                "status": response.status.as_u16(),
                "from_cache": response.from_cache,
                "bytes": response.body.len(),
                "ms": (elapsed_ms * 100.0).round() / 100.0,
            }),
            Some(Err(e)) => {
                warn!(url = %url, error = %e, "Fetch failed");
                json!({ "url": url.as_str(), "error": e.to_string() })
            }
            None => json!({ "url": url.as_str(), "error": "not controlled" }),
        };
        fetches.push(entry);
    }

    if let Some(text) = &args.push {
        let controller = container
            .controller(&scope)
            .await
            .ok_or_not_found(format!("controller for {scope}"))?;
        controller.on_push(Some(PushPayload::text(text))).await?;
    }

    let mut buckets = serde_json::Map::new();
    for name in caches.keys().await? {
        let entries = caches.entries(&name).await;
        buckets.insert(name, json!(entries));
    }

    let mut worker_log = Vec::new();
    while let Ok(event) = worker_events.try_recv() {
        worker_log.push(format!("{event:?}"));
    }
    let mut container_log = Vec::new();
    while let Ok(event) = container_events.try_recv() {
        container_log.push(format!("{event:?}"));
    }

    let summary = json!({
        "scope": scope,
        "fetches": fetches,
        "caches": buckets,
        "worker_events": worker_log,
        "container_events": container_log,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
