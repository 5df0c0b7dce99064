//! Page-side registration (`navigator.serviceWorker`).
//!
//! The container owns one registration per scope. Registering drives the new
//! worker through install and then either makes it the controller or parks it
//! as `waiting` until the page accepts the update.

use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use rockfest_net::{Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::lifecycle::{ServiceWorkerId, ServiceWorkerState};
use crate::message::WorkerMessage;
use crate::worker::{FestivalWorker, ServiceWorkerHooks};
use crate::ServiceWorkerError;

/// Which kind of build is hosting the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProfile {
    /// Local development. Workers are never registered.
    Development,
    Production,
}

impl BuildProfile {
    /// Profile of the running binary.
    pub fn current() -> Self {
        if cfg!(debug_assertions) {
            BuildProfile::Development
        } else {
            BuildProfile::Production
        }
    }
}

/// Events the page reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    /// A new worker started installing.
    UpdateFound { scope: String },
    /// A new worker is installed and waiting; prompt the user.
    UpdateReady {
        scope: String,
        worker_id: ServiceWorkerId,
    },
    /// A new worker now controls the scope.
    ControllerChange {
        scope: String,
        worker_id: ServiceWorkerId,
    },
    /// Install failed; the previous controller (if any) stays.
    InstallFailed { scope: String, reason: String },
}

/// A service worker registration.
#[derive(Default)]
pub struct ServiceWorkerRegistration {
    /// Installing worker.
    pub installing: Option<Arc<FestivalWorker>>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<Arc<FestivalWorker>>,

    /// Active worker.
    pub active: Option<Arc<FestivalWorker>>,

    /// Last time a worker was registered here.
    pub last_update_check: Option<Instant>,
}

/// Service worker container (navigator.serviceWorker).
pub struct ServiceWorkerContainer {
    profile: BuildProfile,
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,
    event_tx: mpsc::UnboundedSender<ContainerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(profile: BuildProfile) -> (Self, mpsc::UnboundedReceiver<ContainerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                profile,
                registrations: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ContainerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Register `worker` for the directory of its script URL.
    ///
    /// Returns the scope on success. Nothing is registered in development
    /// builds, and failures are logged rather than surfaced to the page.
    pub async fn register(&self, worker: FestivalWorker) -> Option<String> {
        if self.profile == BuildProfile::Development {
            debug!("Development build, skipping service worker registration");
            return None;
        }

        let script_url = worker.script_url().await;
        let scope = match script_url.join("./") {
            Ok(scope) => scope.to_string(),
            Err(e) => {
                warn!(script = %script_url, error = %e, "Registration failed");
                return None;
            }
        };

        let worker = Arc::new(worker);
        let has_controller = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations.entry(scope.clone()).or_default();
            registration.installing = Some(Arc::clone(&worker));
            registration.last_update_check = Some(Instant::now());
            registration.active.is_some()
        };
        self.emit(ContainerEvent::UpdateFound {
            scope: scope.clone(),
        });

        if let Err(e) = worker.on_install().await {
            warn!(scope = %scope, error = %e, "Service worker install failed");
            if let Some(registration) = self.registrations.write().await.get_mut(&scope) {
                registration.installing = None;
            }
            self.emit(ContainerEvent::InstallFailed {
                scope,
                reason: e.to_string(),
            });
            return None;
        }

        let skip_waiting = worker.state().await == ServiceWorkerState::Activating;
        if has_controller && !skip_waiting {
            if let Some(registration) = self.registrations.write().await.get_mut(&scope) {
                registration.installing = None;
                if let Some(previous) = registration.waiting.replace(Arc::clone(&worker)) {
                    previous.retire().await;
                }
            }
            info!(scope = %scope, worker = worker.id().raw(), "Update installed, waiting");
            self.emit(ContainerEvent::UpdateReady {
                scope: scope.clone(),
                worker_id: worker.id(),
            });
            return Some(scope);
        }

        if let Err(e) = self.promote(&scope, worker).await {
            warn!(scope = %scope, error = %e, "Service worker activation failed");
            return None;
        }
        info!(scope = %scope, "Service worker registered");
        Some(scope)
    }

    /// Accept the waiting update: skip waiting and take control.
    pub async fn accept_update(&self, scope: &str) -> Result<(), ServiceWorkerError> {
        let waiting = self
            .registrations
            .write()
            .await
            .get_mut(scope)
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::StateError(format!("No waiting worker for {scope}")))?;

        waiting.on_message(WorkerMessage::SkipWaiting).await?;
        self.promote(scope, waiting).await
    }

    /// Activate `worker` and make it the controller, retiring the old one.
    async fn promote(&self, scope: &str, worker: Arc<FestivalWorker>) -> Result<(), ServiceWorkerError> {
        worker.on_activate().await?;

        let previous = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            if registration
                .installing
                .as_ref()
                .is_some_and(|w| w.id() == worker.id())
            {
                registration.installing = None;
            }
            registration.active.replace(Arc::clone(&worker))
        };
        if let Some(previous) = previous {
            previous.retire().await;
        }

        self.emit(ContainerEvent::ControllerChange {
            scope: scope.to_string(),
            worker_id: worker.id(),
        });
        Ok(())
    }

    /// Scope whose registration covers `url` (longest match wins).
    pub async fn get_registration(&self, url: &Url) -> Option<String> {
        self.registrations
            .read()
            .await
            .keys()
            .filter(|scope| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|scope| scope.len())
            .cloned()
    }

    /// All registered scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// The active worker for `scope`.
    pub async fn controller(&self, scope: &str) -> Option<Arc<FestivalWorker>> {
        self.registrations
            .read()
            .await
            .get(scope)
            .and_then(|r| r.active.clone())
    }

    /// The waiting worker for `scope`.
    pub async fn waiting(&self, scope: &str) -> Option<Arc<FestivalWorker>> {
        self.registrations
            .read()
            .await
            .get(scope)
            .and_then(|r| r.waiting.clone())
    }

    /// Dispatch a page request to its controller.
    ///
    /// `None` means nothing controls the URL and the request goes to the network.
    pub async fn handle_fetch(&self, request: Request) -> Option<Result<Response, ServiceWorkerError>> {
        let scope = self.get_registration(&request.url).await?;
        let controller = self.controller(&scope).await?;
        Some(controller.on_fetch(request).await)
    }

    /// Unregister `scope`, retiring all of its workers.
    pub async fn unregister(&self, scope: &str) -> bool {
        let removed = self.registrations.write().await.remove(scope);
        let Some(registration) = removed else {
            return false;
        };
        for worker in [registration.installing, registration.waiting, registration.active]
            .into_iter()
            .flatten()
        {
            worker.retire().await;
        }
        info!(scope = %scope, "Service worker unregistered");
        true
    }
}
