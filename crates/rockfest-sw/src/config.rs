//! Worker configuration.
//!
//! Everything the worker treats as fixed for one release (bucket names, the app
//! shell, route markers, notification text) lives here and is injected into the
//! worker at construction, so tests can run several cache versions side by side.

use std::path::Path;

use rockfest_common::{ResultExt, RockfestError};
use serde::{Deserialize, Serialize};
use url::Url;

/// Current cache version. Bump on every release that changes the app shell.
pub const CACHE_VERSION: &str = "v1";

/// Names of the two live cache buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNames {
    /// App-shell bucket, filled on install.
    pub static_name: String,
    /// Runtime bucket, filled by fetch handling.
    pub dynamic_name: String,
}

impl CacheNames {
    pub fn new(static_name: impl Into<String>, dynamic_name: impl Into<String>) -> Self {
        Self {
            static_name: static_name.into(),
            dynamic_name: dynamic_name.into(),
        }
    }

    /// `{prefix}-static-{version}` and `{prefix}-dynamic-{version}`.
    pub fn versioned(prefix: &str, version: &str) -> Self {
        Self::new(
            format!("{prefix}-static-{version}"),
            format!("{prefix}-dynamic-{version}"),
        )
    }

    /// Whether `name` is one of the live buckets.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name || name == self.dynamic_name
    }
}

impl Default for CacheNames {
    fn default() -> Self {
        Self::versioned("rockfest", CACHE_VERSION)
    }
}

/// A notification action button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub title: String,
    pub icon: String,
}

/// Push notification presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    /// Used when the push carries no text.
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    pub explore: ActionConfig,
    pub close: ActionConfig,
    /// Where the `explore` action takes the user.
    pub open_path: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Rock Festival".to_string(),
            default_body: "New festival update available!".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
            explore: ActionConfig {
                title: "Explore Lineup".to_string(),
                icon: "/icons/checkmark.png".to_string(),
            },
            close: ActionConfig {
                title: "Close".to_string(),
                icon: "/icons/xmark.png".to_string(),
            },
            open_path: "/".to_string(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Site origin that relative paths resolve against.
    pub origin: Url,

    /// Path of the worker script.
    pub script_path: String,

    /// Live bucket names.
    pub caches: CacheNames,

    /// App shell, stored all-or-nothing on install.
    pub static_assets: Vec<String>,

    /// Fallback document for failed navigations. Must be in `static_assets`.
    pub offline_page: String,

    /// Path suffixes served cache-first.
    pub static_suffixes: Vec<String>,

    /// Path substrings served network-first.
    pub api_patterns: Vec<String>,

    /// Call skip-waiting as soon as install succeeds.
    pub skip_waiting_on_install: bool,

    /// Push notification presentation.
    pub notification: NotificationConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let static_assets: Vec<String> = [
            "/",
            "/index.html",
            "/manifest.json",
            "/icons/icon-192x192.png",
            "/icons/icon-512x512.png",
            "/offline.html",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        // The shell paths double as suffixes, so any directory-style navigation
        // ("/lineup/") is served cache-first with the offline page as fallback.
        let static_suffixes = static_assets
            .iter()
            .cloned()
            .chain(
                [".js", ".css", ".png", ".jpg", ".jpeg", ".svg", ".webp", ".ico", ".woff2"]
                    .into_iter()
                    .map(String::from),
            )
            .collect();

        Self {
            origin: Url::parse("http://localhost:3000/").expect("static origin is valid"),
            script_path: "/sw.js".to_string(),
            caches: CacheNames::default(),
            static_assets,
            offline_page: "/offline.html".to_string(),
            static_suffixes,
            api_patterns: vec![
                "/api/bands".to_string(),
                "/api/schedule".to_string(),
                "/api/tickets".to_string(),
            ],
            skip_waiting_on_install: true,
            notification: NotificationConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> rockfest_common::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> rockfest_common::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .context(format!("reading {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> rockfest_common::Result<()> {
        let names = &self.caches;
        if names.static_name.is_empty() || names.dynamic_name.is_empty() {
            return Err(RockfestError::config("cache names must not be empty"));
        }
        if names.static_name == names.dynamic_name {
            return Err(RockfestError::config(format!(
                "static and dynamic caches share the name {:?}",
                names.static_name
            )));
        }
        if self.static_assets.is_empty() {
            return Err(RockfestError::config("static asset list is empty"));
        }
        if !self.static_assets.contains(&self.offline_page) {
            return Err(RockfestError::config(format!(
                "offline page {} is not a static asset",
                self.offline_page
            )));
        }
        let paths = [&self.script_path, &self.notification.open_path];
        for path in self.static_assets.iter().chain(paths) {
            self.origin.join(path).map_err(|e| {
                RockfestError::InvalidArgument(format!("{path}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Resolve a path (or absolute URL) against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.origin.join(path)
    }

    pub fn cache_names(&self) -> &CacheNames {
        &self.caches
    }
}
