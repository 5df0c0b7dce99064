//! Worker lifecycle state machine.
//!
//! ```text
//! Parsed → Installing → Installed (waiting) → Activating → Activated
//!              │                                   ▲
//!              └──── skip-waiting requested ───────┘
//!
//! any state → Redundant (install failed, replaced, unregistered)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Script evaluated, nothing dispatched yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Whether `next` is a legal successor. `Installing → Activating` additionally
    /// needs skip-waiting, which [`Lifecycle`] checks.
    pub fn can_transition_to(&self, next: ServiceWorkerState) -> bool {
        use ServiceWorkerState::*;
        match (self, next) {
            (Redundant, _) => false,
            (_, Redundant) => true,
            (Parsed, Installing)
            | (Installing, Installed)
            | (Installing, Activating)
            | (Installed, Activating)
            | (Activating, Activated) => true,
            _ => false,
        }
    }

    /// Only an activated worker handles fetches.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        }
    }
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle record of one worker version.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    state: ServiceWorkerState,

    /// `skipWaiting()` was called.
    skip_waiting: bool,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl Lifecycle {
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.state
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    fn transition(&mut self, next: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot go from {} to {}",
                self.state, next
            )));
        }
        info!(worker = self.id.raw(), from = %self.state, to = %next, "Worker state change");
        self.state = next;
        self.state_changed_at = Instant::now();
        Ok(())
    }

    /// `Parsed → Installing`.
    pub fn begin_install(&mut self) -> Result<(), ServiceWorkerError> {
        self.transition(ServiceWorkerState::Installing)
    }

    /// `Installing → Installed`, or straight to `Activating` when skip-waiting
    /// was requested during install. Returns the new state.
    pub fn install_succeeded(&mut self) -> Result<ServiceWorkerState, ServiceWorkerError> {
        if self.state != ServiceWorkerState::Installing {
            return Err(ServiceWorkerError::StateError(format!(
                "install finished while {}",
                self.state
            )));
        }
        let next = if self.skip_waiting {
            ServiceWorkerState::Activating
        } else {
            ServiceWorkerState::Installed
        };
        self.transition(next)?;
        Ok(next)
    }

    /// Install rejected: this version never serves traffic.
    pub fn install_failed(&mut self) {
        self.retire();
    }

    /// Record a skip-waiting request. Returns `true` if it moved a waiting
    /// worker to `Activating`.
    pub fn skip_waiting(&mut self) -> bool {
        self.skip_waiting = true;
        if self.state == ServiceWorkerState::Installed {
            // Installed → Activating is always legal.
            return self.transition(ServiceWorkerState::Activating).is_ok();
        }
        false
    }

    /// `Installed → Activating`; already `Activating` is accepted as is.
    pub fn begin_activate(&mut self) -> Result<(), ServiceWorkerError> {
        match self.state {
            ServiceWorkerState::Activating => Ok(()),
            _ => self.transition(ServiceWorkerState::Activating),
        }
    }

    /// `Activating → Activated`.
    pub fn activated(&mut self) -> Result<(), ServiceWorkerError> {
        self.transition(ServiceWorkerState::Activated)
    }

    /// Any state → `Redundant`. No-op if already redundant.
    pub fn retire(&mut self) {
        if self.state != ServiceWorkerState::Redundant {
            let _ = self.transition(ServiceWorkerState::Redundant);
        }
    }
}
