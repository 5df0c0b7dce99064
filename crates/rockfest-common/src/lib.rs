//! # Rockfest Common
//!
//! Pieces every Rockfest crate shares:
//!
//! - [`RockfestError`], the error callers outside the worker see, with a
//!   stable [`category`](RockfestError::category) for log fields
//! - [`ResultExt`] / [`OptionExt`] for attaching context
//! - [`init_logging`] and its [`LogConfig`]

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type at the edges of the Rockfest crates.
#[derive(Error, Debug)]
pub enum RockfestError {
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A cache read or write failed. Pages are still served.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Install, activation or an illegal state transition.
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Something that should not happen. Carries a backtrace.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl RockfestError {
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    pub fn lifecycle_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Internal error with a backtrace captured here.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether the page can still be served despite this error.
    ///
    /// Cache failures never break a response; everything else might.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RockfestError::Cache { .. })
    }

    /// Short name for the `category` log field.
    pub fn category(&self) -> &'static str {
        match self {
            RockfestError::Network { .. } => "network",
            RockfestError::Cache { .. } => "cache",
            RockfestError::Lifecycle { .. } => "lifecycle",
            RockfestError::Config { .. } => "config",
            RockfestError::Io(_) => "io",
            RockfestError::Json(_) => "json",
            RockfestError::NotFound(_) => "not_found",
            RockfestError::InvalidArgument(_) => "invalid_argument",
            RockfestError::Internal { .. } => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, RockfestError>;

/// Context for foreign errors.
pub trait ResultExt<T> {
    /// Wrap the error as [`RockfestError::Internal`], prefixed with `message`.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| RockfestError::internal(format!("{}: {e}", message.into())))
    }
}

pub trait OptionExt<T> {
    /// `None` becomes [`RockfestError::NotFound`] naming `resource`.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| RockfestError::NotFound(resource.into()))
    }
}
