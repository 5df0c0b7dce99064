//! Caching strategies.
//!
//! A response is only ever written to a bucket when [`is_cacheable`] holds, and
//! writes are best-effort: a failed put is logged and the response is still
//! returned to the page.

use std::sync::Arc;

use http::{Method, StatusCode};
use rockfest_net::{Fetcher, Request, RequestDestination, Response, ResponseType};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::CacheNames;
use crate::route::Route;
use crate::ServiceWorkerError;

/// Human-readable text of the offline JSON payload.
pub const OFFLINE_MESSAGE: &str =
    "You are offline and this festival data has not been saved for offline use yet.";

/// `ok`, not partial, GET, and same-origin.
pub fn is_cacheable(request: &Request, response: &Response) -> bool {
    response.ok()
        && response.status != StatusCode::PARTIAL_CONTENT
        && request.method == Method::GET
        && response.response_type == ResponseType::Basic
}

/// 503 with `{"error":"Offline","message":…,"cached":false}`.
pub fn offline_json_response(url: Url) -> Response {
    Response::json(
        url,
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({
            "error": "Offline",
            "message": OFFLINE_MESSAGE,
            "cached": false,
        }),
    )
}

/// The four request strategies over shared caches and network.
#[derive(Clone)]
pub struct Strategies {
    caches: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    names: CacheNames,
    offline_page: Url,
}

impl Strategies {
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        names: CacheNames,
        offline_page: Url,
    ) -> Self {
        Self {
            caches,
            fetcher,
            names,
            offline_page,
        }
    }

    /// Run the strategy for `route`.
    pub async fn run(&self, route: Route, request: Request) -> Result<Response, ServiceWorkerError> {
        debug!(url = %request.url, route = route.as_str(), "Handling fetch");
        match route {
            Route::Bypass => self.bypass(request).await,
            Route::CacheFirst => self.cache_first(request).await,
            Route::NetworkFirst => self.network_first(request).await,
            Route::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        }
    }

    /// Network only. Never touches a bucket.
    pub async fn bypass(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        Ok(self.fetcher.fetch(request).await?)
    }

    /// Static bucket, then network. Failed navigations get the offline page.
    pub async fn cache_first(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        match self.caches.match_in(&self.names.static_name, &request).await {
            Ok(Some(hit)) => {
                debug!(url = %request.url, "Static cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Static cache lookup failed"),
        }

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                self.store(&self.names.static_name, &request, &response).await;
                Ok(response)
            }
            Err(err) if request.destination == RequestDestination::Document => {
                debug!(url = %request.url, error = %err, "Navigation failed, trying offline page");
                match self.offline_page().await {
                    Some(page) => Ok(page),
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Network, then any bucket, then a synthesized 503 JSON body.
    pub async fn network_first(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let err = match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                self.store(&self.names.dynamic_name, &request, &response).await;
                return Ok(response);
            }
            Err(err) => err,
        };

        debug!(url = %request.url, error = %err, "Network failed, falling back to cache");
        match self.caches.match_any(&request).await {
            Ok(Some(hit)) => Ok(hit),
            Ok(None) => Ok(offline_json_response(request.url.clone())),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed");
                Ok(offline_json_response(request.url.clone()))
            }
        }
    }

    /// Cached copy if any, without waiting for the network. The network fetch
    /// always runs and refreshes the dynamic bucket for next time.
    pub async fn stale_while_revalidate(
        &self,
        request: Request,
    ) -> Result<Response, ServiceWorkerError> {
        let revalidation = {
            let this = self.clone();
            let request = request.fork();
            tokio::spawn(async move { this.revalidate(request).await })
        };

        match self.caches.match_any(&request).await {
            Ok(Some(hit)) => {
                debug!(url = %request.url, "Serving stale copy");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed"),
        }

        revalidation
            .await
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))?
    }

    async fn revalidate(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                self.store(&self.names.dynamic_name, &request, &response).await;
                Ok(response)
            }
            Err(err) => {
                debug!(url = %request.url, error = %err, "Background revalidation failed");
                Err(err.into())
            }
        }
    }

    async fn offline_page(&self) -> Option<Response> {
        let request = Request::get(self.offline_page.clone());
        match self.caches.match_in(&self.names.static_name, &request).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Offline page lookup failed");
                None
            }
        }
    }

    /// Best-effort write. Returns whether the entry was stored.
    pub(crate) async fn store(&self, bucket: &str, request: &Request, response: &Response) -> bool {
        if !is_cacheable(request, response) {
            debug!(
                url = %request.url,
                status = response.status.as_u16(),
                response_type = response.response_type.as_str(),
                "Response not cacheable"
            );
            return false;
        }
        match self.caches.put(bucket, request, response).await {
            Ok(()) => true,
            Err(e) => {
                warn!(cache = bucket, url = %request.url, error = %e, "Cache write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{url, CountingStorage, MockFetcher};
    use bytes::Bytes;
    use http::{header, HeaderValue};
    use std::time::Duration;

    struct Fixture {
        storage: Arc<CountingStorage>,
        fetcher: Arc<MockFetcher>,
        strategies: Strategies,
    }

    fn fixture() -> Fixture {
        fixture_with(CountingStorage::new())
    }

    fn fixture_with(storage: CountingStorage) -> Fixture {
        let storage = Arc::new(storage);
        let fetcher = Arc::new(MockFetcher::new());
        let strategies = Strategies::new(
            storage.clone(),
            fetcher.clone(),
            CacheNames::new("static-v1", "dynamic-v1"),
            url("/offline.html"),
        );
        Fixture {
            storage,
            fetcher,
            strategies,
        }
    }

    fn ok(path: &str) -> Response {
        Response::new(url(path), StatusCode::OK, "fresh")
    }

    #[test]
    fn test_cacheable_requires_every_clause() {
        let get = Request::get(url("/api/bands"));
        assert!(is_cacheable(&get, &ok("/api/bands")));

        let not_found = Response::new(url("/api/bands"), StatusCode::NOT_FOUND, "");
        assert!(!is_cacheable(&get, &not_found));

        let partial = Response::new(url("/api/bands"), StatusCode::PARTIAL_CONTENT, "");
        assert!(!is_cacheable(&get, &partial));

        let post = Request::post(url("/api/bands"), Bytes::new());
        assert!(!is_cacheable(&post, &ok("/api/bands")));

        for response_type in [ResponseType::Cors, ResponseType::Opaque, ResponseType::Error] {
            assert!(!is_cacheable(&get, &ok("/api/bands").with_type(response_type)));
        }
    }

    #[tokio::test]
    async fn test_ineligible_responses_are_never_written() {
        let f = fixture();
        f.fetcher
            .respond_with("/api/bands", Response::new(url("/api/bands"), StatusCode::NOT_FOUND, ""));
        f.fetcher.respond_with(
            "/api/schedule",
            Response::new(url("/api/schedule"), StatusCode::PARTIAL_CONTENT, ""),
        );
        f.fetcher
            .respond_with("/api/tickets", ok("/api/tickets").with_type(ResponseType::Opaque));
        f.fetcher.respond("/api/quiz", StatusCode::OK, "{}");

        f.strategies.network_first(Request::get(url("/api/bands"))).await.unwrap();
        f.strategies.network_first(Request::get(url("/api/schedule"))).await.unwrap();
        f.strategies.network_first(Request::get(url("/api/tickets"))).await.unwrap();
        f.strategies
            .network_first(Request::post(url("/api/quiz"), Bytes::from_static(b"{}")))
            .await
            .unwrap();

        assert_eq!(f.storage.puts(), 0);
    }

    #[tokio::test]
    async fn test_bypass_never_touches_cache() {
        let f = fixture();
        f.fetcher.respond_with(
            "/media/aftermovie.mp4",
            Response::new(url("/media/aftermovie.mp4"), StatusCode::PARTIAL_CONTENT, "chunk"),
        );

        let request = Request::get(url("/media/aftermovie.mp4"))
            .header(header::RANGE, HeaderValue::from_static("bytes=0-4"));
        let response = f.strategies.run(Route::Bypass, request).await.unwrap();

        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(f.storage.total_calls(), 0);
        assert_eq!(f.fetcher.call_count("/media/aftermovie.mp4"), 1);
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let f = fixture();
        let request = Request::get(url("/assets/app.js"));
        f.storage.inner().put("static-v1", &request, &ok("/assets/app.js")).await.unwrap();
        f.fetcher.respond("/assets/app.js", StatusCode::OK, "new");

        let response = f.strategies.cache_first(request).await.unwrap();

        assert!(response.from_cache);
        assert_eq!(f.fetcher.call_count("/assets/app.js"), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_once_and_stores_once() {
        let f = fixture();
        f.fetcher.respond("/assets/app.js", StatusCode::OK, "bundle");

        let response = f.strategies.cache_first(Request::get(url("/assets/app.js"))).await.unwrap();

        assert!(!response.from_cache);
        assert_eq!(f.fetcher.call_count("/assets/app.js"), 1);
        assert_eq!(f.storage.puts(), 1);
        assert_eq!(
            f.storage.inner().entries("static-v1").await,
            vec![url("/assets/app.js").to_string()]
        );
    }

    #[tokio::test]
    async fn test_cache_first_ignores_dynamic_bucket() {
        let f = fixture();
        let request = Request::get(url("/assets/app.js"));
        f.storage.inner().put("dynamic-v1", &request, &ok("/assets/app.js")).await.unwrap();
        f.fetcher.respond("/assets/app.js", StatusCode::OK, "bundle");

        f.strategies.cache_first(request).await.unwrap();
        assert_eq!(f.fetcher.call_count("/assets/app.js"), 1);
    }

    #[tokio::test]
    async fn test_cache_first_offline_navigation_gets_offline_page() {
        let f = fixture();
        let offline = Request::get(url("/offline.html"));
        f.storage
            .inner()
            .put("static-v1", &offline, &Response::new(url("/offline.html"), StatusCode::OK, "offline"))
            .await
            .unwrap();

        let response = f.strategies.cache_first(Request::navigate(url("/lineup/"))).await.unwrap();

        assert!(response.from_cache);
        assert_eq!(response.text().unwrap(), "offline");
    }

    #[tokio::test]
    async fn test_cache_first_offline_subresource_fails() {
        let f = fixture();
        let offline = Request::get(url("/offline.html"));
        f.storage.inner().put("static-v1", &offline, &ok("/offline.html")).await.unwrap();

        let result = f.strategies.cache_first(Request::get(url("/assets/app.js"))).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_cache_first_offline_navigation_without_offline_page_fails() {
        let f = fixture();
        let result = f.strategies.cache_first(Request::navigate(url("/"))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_network_first_stores_in_dynamic() {
        let f = fixture();
        f.fetcher.respond("/api/bands", StatusCode::OK, "[\"Headliner\"]");

        let response = f.strategies.network_first(Request::get(url("/api/bands"))).await.unwrap();

        assert_eq!(response.text().unwrap(), "[\"Headliner\"]");
        assert_eq!(
            f.storage.inner().entries("dynamic-v1").await,
            vec![url("/api/bands").to_string()]
        );
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let f = fixture();
        let request = Request::get(url("/api/schedule"));
        f.storage
            .inner()
            .put("dynamic-v1", &request, &Response::new(url("/api/schedule"), StatusCode::OK, "cached"))
            .await
            .unwrap();

        let response = f.strategies.network_first(request).await.unwrap();

        assert!(response.from_cache);
        assert_eq!(response.text().unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_network_first_offline_json() {
        let f = fixture();

        let response = f.strategies.network_first(Request::get(url("/api/bands"))).await.unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.header("content-type"), Some("application/json"));
        let body: serde_json::Value = response.json_body().unwrap();
        assert_eq!(body["error"], "Offline");
        assert_eq!(body["cached"], false);
        assert_eq!(body["message"], OFFLINE_MESSAGE);
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_swallowed() {
        let f = fixture_with(CountingStorage::failing_puts());
        f.fetcher.respond("/api/bands", StatusCode::OK, "[]");

        let response = f.strategies.network_first(Request::get(url("/api/bands"))).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(f.storage.puts(), 1);
        assert!(f.storage.inner().entries("dynamic-v1").await.is_empty());
    }

    #[tokio::test]
    async fn test_swr_returns_cached_without_waiting() {
        let f = fixture();
        let request = Request::get(url("/lineup"));
        f.storage
            .inner()
            .put("dynamic-v1", &request, &Response::new(url("/lineup"), StatusCode::OK, "stale"))
            .await
            .unwrap();
        f.fetcher.hang("/lineup");

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            f.strategies.stale_while_revalidate(request),
        )
        .await
        .expect("cached response must not wait for the network")
        .unwrap();

        assert_eq!(response.text().unwrap(), "stale");
    }

    #[tokio::test]
    async fn test_swr_refreshes_in_background() {
        let f = fixture();
        let request = Request::get(url("/lineup"));
        f.storage
            .inner()
            .put("dynamic-v1", &request, &Response::new(url("/lineup"), StatusCode::OK, "stale"))
            .await
            .unwrap();
        f.fetcher.respond("/lineup", StatusCode::OK, "fresh");

        let first = f.strategies.stale_while_revalidate(request.clone()).await.unwrap();
        assert_eq!(first.text().unwrap(), "stale");

        // Let the background task finish its write.
        for _ in 0..50 {
            if f.storage.puts() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let second = f.storage.inner().match_any(&request).await.unwrap().unwrap();
        assert_eq!(second.text().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_swr_miss_waits_for_network() {
        let f = fixture();
        f.fetcher.respond("/gallery", StatusCode::OK, "photos");

        let response = f.strategies.stale_while_revalidate(Request::get(url("/gallery"))).await.unwrap();

        assert!(!response.from_cache);
        assert_eq!(response.text().unwrap(), "photos");
        assert_eq!(f.storage.inner().entries("dynamic-v1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_swr_miss_and_offline_fails() {
        let f = fixture();
        let result = f.strategies.stale_while_revalidate(Request::get(url("/gallery"))).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
    }
}
