//! Push messages and the notifications they produce.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::NotificationConfig;

/// Action id that opens the site.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses.
pub const ACTION_CLOSE: &str = "close";

/// Raw push message data.
#[derive(Debug, Clone, Default)]
pub struct PushPayload(pub Bytes);

impl PushPayload {
    pub fn text(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Trimmed UTF-8 text, `None` when empty or not text.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0)
            .ok()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// A notification action button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Extra data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Arrival time, ms since epoch.
    pub date_of_arrival: u64,
    pub primary_key: u64,
}

/// Options passed to `showNotification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the festival notification for a push. Missing or unreadable
    /// payloads get the default body.
    pub fn for_push(config: &NotificationConfig, payload: Option<&PushPayload>, key: u64) -> Self {
        let body = payload
            .and_then(PushPayload::body_text)
            .unwrap_or(config.default_body.as_str())
            .to_string();

        Self {
            title: config.title.clone(),
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
                primary_key: key,
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_EXPLORE.to_string(),
                    title: config.explore.title.clone(),
                    icon: config.explore.icon.clone(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: config.close.title.clone(),
                    icon: config.close.icon.clone(),
                },
            ],
        }
    }
}

/// A `notificationclick` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationClick {
    /// Chosen action id; `None` when the body was clicked.
    pub action: Option<String>,
    pub primary_key: u64,
}

impl NotificationClick {
    pub fn action(action: &str, primary_key: u64) -> Self {
        Self {
            action: Some(action.to_string()),
            primary_key,
        }
    }

    pub fn is_explore(&self) -> bool {
        self.action.as_deref() == Some(ACTION_EXPLORE)
    }
}
