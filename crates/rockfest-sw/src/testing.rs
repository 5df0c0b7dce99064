//! Scripted network and instrumented cache storage for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use http::StatusCode;
use rockfest_net::{Fetcher, NetError, Request, Response};
use url::Url;

use crate::cache::{CacheError, CacheStorage, MemoryCacheStorage};

pub const ORIGIN: &str = "https://rockfest.example/";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
enum Outcome {
    Respond(Response),
    Hang,
}

/// Fetcher answering from a path table. Unknown paths fail as offline.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Outcome>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, status: StatusCode, body: &str) {
        self.respond_with(path, Response::new(url(path), status, body.to_string()));
    }

    pub fn respond_with(&self, path: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Outcome::Respond(response));
    }

    /// Never resolve requests for `path`.
    pub fn hang(&self, path: &str) {
        self.routes.lock().unwrap().insert(path.to_string(), Outcome::Hang);
    }

    /// Make `path` fail again.
    pub fn fail(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        let path = request.url.path().to_string();
        self.calls.lock().unwrap().push(path.clone());
        let outcome = self.routes.lock().unwrap().get(&path).cloned();
        Box::pin(async move {
            match outcome {
                Some(Outcome::Respond(response)) => Ok(response),
                Some(Outcome::Hang) => futures::future::pending().await,
                None => Err(NetError::Offline(path)),
            }
        })
    }
}

/// Counts every storage call and can inject failures.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryCacheStorage,
    opens: AtomicUsize,
    lookups: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    listings: AtomicUsize,
    fail_puts: bool,
    fail_delete: Option<String>,
}

impl CountingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every put is counted and then rejected with a quota error.
    pub fn failing_puts() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    /// Deleting `name` fails with a backend error.
    pub fn failing_delete(name: &str) -> Self {
        Self {
            fail_delete: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Uncounted access for arranging and inspecting state.
    pub fn inner(&self) -> &MemoryCacheStorage {
        &self.inner
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        [&self.opens, &self.lookups, &self.puts, &self.deletes, &self.listings]
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }
}

impl CacheStorage for CountingStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(name)
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.has(name)
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        self.inner.keys()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.as_deref() == Some(name) {
            return Box::pin(async move { Err(CacheError::Backend(format!("cannot delete {name}"))) });
        }
        self.inner.delete(name)
    }

    fn match_in<'a>(
        &'a self,
        name: &'a str,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.match_in(name, request)
    }

    fn match_any<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.match_any(request)
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        request: &'a Request,
        response: &'a Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts {
            return Box::pin(async move {
                Err(CacheError::QuotaExceeded {
                    needed: response.body.len(),
                    available: 0,
                })
            });
        }
        self.inner.put(name, request, response)
    }
}
