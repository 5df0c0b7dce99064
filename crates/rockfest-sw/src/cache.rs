//! Cache buckets and the storage seam.
//!
//! ```text
//! CacheStorage (caches)
//!     ├── rockfest-static-v1   Request → Response
//!     └── rockfest-dynamic-v1  Request → Response
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use rockfest_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

/// Errors from cache storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// `206 Partial Content` can never be stored.
    #[error("Partial response for {0}")]
    PartialContent(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Cache key for a request: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response tainting, restored on match.
    #[serde(default)]
    pub response_type: ResponseType,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: cache_key(&request.url),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            response_type: response.response_type,
            body: response.body.to_vec(),
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Rebuild the response this entry was made from.
    pub fn to_response(&self) -> Option<Response> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        let url = Url::parse(&self.url).ok()?;
        Some(Response {
            url,
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(self.body.clone()),
            response_type: self.response_type,
            from_cache: true,
        })
    }

    fn size(&self) -> usize {
        self.body.len()
    }
}

/// A cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries, keyed by [`cache_key`].
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only GET requests can match.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if request.method != Method::GET {
            return None;
        }
        self.entries.get(&cache_key(&request.url))
    }

    /// Add or replace an entry. Returns the replaced entry.
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.url.clone(), entry)
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key(url)).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn size(&self) -> usize {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

/// Named cache buckets, as exposed by the `caches` global.
///
/// Implementations must be safe to share between concurrently handled events.
/// Each call is atomic on its own; nothing spans calls.
pub trait CacheStorage: Send + Sync {
    /// Create the bucket if it does not exist.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Bucket names in creation order.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;

    /// Delete a bucket and every entry in it. `false` if it did not exist.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Look `request` up in one bucket.
    fn match_in<'a>(
        &'a self,
        name: &'a str,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>>;

    /// Look `request` up in every bucket, oldest first.
    fn match_any<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>>;

    /// Store `response` for `request`, opening the bucket if needed.
    fn put<'a>(
        &'a self,
        name: &'a str,
        request: &'a Request,
        response: &'a Response,
    ) -> BoxFuture<'a, Result<(), CacheError>>;
}

/// In-memory cache storage with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    /// Buckets in creation order.
    caches: RwLock<Vec<Cache>>,
    /// Total body bytes allowed across all buckets.
    quota: Option<usize>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that refuses writes beyond `bytes` of body data.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            caches: RwLock::new(Vec::new()),
            quota: Some(bytes),
        }
    }

    /// Keys of one bucket, sorted. Empty if the bucket does not exist.
    pub async fn entries(&self, name: &str) -> Vec<String> {
        let caches = self.caches.read().await;
        let mut keys: Vec<String> = caches
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.keys().into_iter().map(String::from).collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;

        if let Some(quota) = self.quota {
            let used: usize = caches.iter().map(Cache::size).sum();
            let replaced = caches
                .iter()
                .find(|c| c.name == name)
                .and_then(|c| c.entries.get(&entry.url))
                .map_or(0, CacheEntry::size);
            let available = quota.saturating_sub(used - replaced);
            if entry.size() > available {
                return Err(CacheError::QuotaExceeded {
                    needed: entry.size(),
                    available,
                });
            }
        }

        trace!(cache = name, url = %entry.url, "Cache put");
        match caches.iter_mut().find(|c| c.name == name) {
            Some(cache) => {
                cache.put(entry);
            }
            None => {
                let mut cache = Cache::new(name);
                cache.put(entry);
                caches.push(cache);
            }
        }
        Ok(())
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut caches = self.caches.write().await;
            if !caches.iter().any(|c| c.name == name) {
                caches.push(Cache::new(name));
            }
            Ok(())
        })
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move { Ok(self.caches.read().await.iter().any(|c| c.name == name)) })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(async move {
            Ok(self
                .caches
                .read()
                .await
                .iter()
                .map(|c| c.name.clone())
                .collect())
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let mut caches = self.caches.write().await;
            let before = caches.len();
            caches.retain(|c| c.name != name);
            Ok(caches.len() != before)
        })
    }

    fn match_in<'a>(
        &'a self,
        name: &'a str,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            let caches = self.caches.read().await;
            Ok(caches
                .iter()
                .find(|c| c.name == name)
                .and_then(|c| c.match_request(request))
                .and_then(CacheEntry::to_response))
        })
    }

    fn match_any<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            let caches = self.caches.read().await;
            Ok(caches
                .iter()
                .find_map(|c| c.match_request(request))
                .and_then(CacheEntry::to_response))
        })
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        request: &'a Request,
        response: &'a Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            if request.method != Method::GET {
                return Err(CacheError::UnsupportedMethod(request.method.to_string()));
            }
            if response.status == StatusCode::PARTIAL_CONTENT {
                return Err(CacheError::PartialContent(cache_key(&request.url)));
            }
            self.put_entry(name, CacheEntry::from_response(request, response))
                .await
        })
    }
}
