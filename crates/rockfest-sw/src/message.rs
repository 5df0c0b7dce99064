//! Page → worker control messages.
//!
//! Messages arrive as `{ "type": "...", ... }` envelopes via `postMessage`.

use serde::{Deserialize, Serialize};

/// A control message from the hosting page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate the waiting worker now.
    SkipWaiting,

    /// Pull these URLs into the dynamic bucket.
    UpdateCache {
        #[serde(default)]
        urls: Vec<String>,
    },

    /// Any other `type`; ignored.
    #[serde(other)]
    Unknown,
}

impl WorkerMessage {
    /// Parse a message envelope.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::SkipWaiting => "SKIP_WAITING",
            WorkerMessage::UpdateCache { .. } => "UPDATE_CACHE",
            WorkerMessage::Unknown => "UNKNOWN",
        }
    }
}
