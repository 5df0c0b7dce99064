//! # Rockfest Service Worker
//!
//! The offline caching layer of the Rockfest festival site.
//!
//! ## Features
//!
//! - **Lifecycle**: install (app shell precache), activate (old cache cleanup), skip-waiting
//! - **Fetch strategies**: cache-first, network-first, stale-while-revalidate, bypass
//! - **Offline fallbacks**: offline page for documents, JSON 503 for API calls
//! - **Messages**: `SKIP_WAITING`, `UPDATE_CACHE`
//! - **Push**: festival notifications and their click actions
//! - **Registration**: page-side container with update prompts
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (navigator.serviceWorker)
//!     │
//!     └── ServiceWorkerRegistration (per scope)
//!             ├── installing / waiting / active (FestivalWorker)
//!
//! FestivalWorker
//!     ├── Lifecycle        parsed → installing → installed → activating → activated
//!     ├── Router           Request → Route
//!     ├── Strategies       Route × Request → Response
//!     │       ├── CacheStorage (static + dynamic buckets)
//!     │       └── Fetcher      (network)
//!     └── Clients
//! ```

use rockfest_common::RockfestError;
use rockfest_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod message;
pub mod push;
pub mod registration;
pub mod route;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cache::{Cache, CacheEntry, CacheError, CacheStorage, MemoryCacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{CacheNames, NotificationConfig, WorkerConfig, CACHE_VERSION};
pub use lifecycle::{Lifecycle, ServiceWorkerId, ServiceWorkerState};
pub use message::WorkerMessage;
pub use push::{Notification, NotificationClick, PushPayload};
pub use registration::{BuildProfile, ContainerEvent, ServiceWorkerContainer};
pub use route::{Route, Router};
pub use strategy::{is_cacheable, offline_json_response, Strategies};
pub use worker::{FestivalWorker, ServiceWorkerHooks, WorkerEvent};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Invalid state: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<NetError> for ServiceWorkerError {
    fn from(e: NetError) -> Self {
        ServiceWorkerError::NetworkError(e.to_string())
    }
}

impl From<CacheError> for ServiceWorkerError {
    fn from(e: CacheError) -> Self {
        ServiceWorkerError::CacheError(e.to_string())
    }
}

impl From<ServiceWorkerError> for RockfestError {
    fn from(e: ServiceWorkerError) -> Self {
        match e {
            ServiceWorkerError::NetworkError(_) => RockfestError::network_with_source("fetch failed", e),
            ServiceWorkerError::CacheError(message) => RockfestError::cache(message),
            ServiceWorkerError::NotFound(what) => RockfestError::NotFound(what),
            ServiceWorkerError::InvalidMessage(message) => RockfestError::InvalidArgument(message),
            ServiceWorkerError::Config(message) => RockfestError::config(message),
            ServiceWorkerError::InstallFailed { .. } | ServiceWorkerError::StateError(_) => {
                RockfestError::lifecycle_with_source("worker lifecycle", e)
            }
        }
    }
}
