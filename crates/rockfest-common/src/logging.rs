//! Tracing subscriber setup shared by the worker crates and the smoke harness.
//!
//! Output is selected by `ROCKFEST_LOG_FORMAT`, filtering by `ROCKFEST_LOG`
//! using the usual `EnvFilter` directive syntax.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable holding a filter directive (e.g. `rockfest_sw=debug`).
pub const LOG_ENV: &str = "ROCKFEST_LOG";

/// Environment variable selecting the output format (`pretty`, `compact`, `json`).
pub const LOG_FORMAT_ENV: &str = "ROCKFEST_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for terminals.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, with the current span attached.
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// How the process logs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `filter` is absent or invalid.
    pub level: Level,
    pub format: LogFormat,
    /// File and line on each event (pretty format only).
    pub include_location: bool,
    /// Emit span enter/close events, handy when tracing a single fetch.
    pub include_span_events: bool,
    /// `EnvFilter` directives, e.g. `rockfest_sw=debug,reqwest=warn`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose local setup: debug level with locations and span events.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// JSON at info, for log shipping.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Build a configuration from `ROCKFEST_LOG` and `ROCKFEST_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(LOG_ENV).ok(),
            std::env::var(LOG_FORMAT_ENV).ok(),
        )
    }

    fn from_vars(filter: Option<String>, format: Option<String>) -> Self {
        let mut config = Self::default();
        config.filter = filter.filter(|f| !f.trim().is_empty());
        if let Some(format) = format.as_deref().and_then(LogFormat::parse) {
            config.format = format;
        }
        config
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        self.filter
            .as_deref()
            .map(|directives| EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()))
            .unwrap_or_else(fallback)
    }
}

/// Install the global subscriber described by `config`.
///
/// A second call is a no-op; the first subscriber stays installed.
pub fn init_logging(config: LogConfig) {
    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(span_events)
            .boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(output)
        .with(config.env_filter())
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "Subscriber already installed");
    }
}
