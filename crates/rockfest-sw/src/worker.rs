//! The festival worker and its event hooks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, try_join_all, BoxFuture};
use rockfest_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::lifecycle::{Lifecycle, ServiceWorkerId, ServiceWorkerState};
use crate::message::WorkerMessage;
use crate::push::{Notification, NotificationClick, PushPayload};
use crate::route::Router;
use crate::strategy::{is_cacheable, Strategies};
use crate::ServiceWorkerError;

/// Side effects the hosting runtime carries out for the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Lifecycle state changed.
    StateChange {
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
    },
    /// Open pages are now controlled by this worker.
    ClientsClaimed {
        worker_id: ServiceWorkerId,
        count: usize,
    },
    /// `registration.showNotification(...)`.
    ShowNotification(Notification),
    /// `notification.close()`.
    CloseNotification { primary_key: u64 },
    /// `clients.openWindow(url)`.
    OpenWindow { client_id: String, url: Url },
    /// `client.focus()`.
    FocusClient { client_id: String },
}

/// The event contract a hosting runtime wires to its native dispatch.
pub trait ServiceWorkerHooks: Send + Sync {
    fn on_install(&self) -> BoxFuture<'_, Result<(), ServiceWorkerError>>;

    fn on_activate(&self) -> BoxFuture<'_, Result<(), ServiceWorkerError>>;

    fn on_fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, ServiceWorkerError>>;

    fn on_message(&self, message: WorkerMessage) -> BoxFuture<'_, Result<(), ServiceWorkerError>>;

    fn on_push(&self, payload: Option<PushPayload>) -> BoxFuture<'_, Result<(), ServiceWorkerError>>;

    fn on_notification_click(
        &self,
        click: NotificationClick,
    ) -> BoxFuture<'_, Result<(), ServiceWorkerError>>;
}

/// The Rockfest offline worker.
pub struct FestivalWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    router: Router,
    strategies: Strategies,
    lifecycle: RwLock<Lifecycle>,
    clients: Arc<RwLock<Clients>>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    notification_keys: AtomicU64,
}

impl FestivalWorker {
    /// Create a worker in the `parsed` state.
    pub fn new(
        config: WorkerConfig,
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), ServiceWorkerError> {
        config
            .validate()
            .map_err(|e| ServiceWorkerError::Config(e.to_string()))?;

        let script_url = config.resolve(&config.script_path).map_err(invalid_config)?;
        let offline_page = config.resolve(&config.offline_page).map_err(invalid_config)?;

        let lifecycle = Lifecycle::new(script_url);
        let strategies = Strategies::new(
            Arc::clone(&caches),
            Arc::clone(&fetcher),
            config.caches.clone(),
            offline_page,
        );
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                id: lifecycle.id,
                router: Router::from_config(&config),
                config: Arc::new(config),
                caches,
                fetcher,
                strategies,
                lifecycle: RwLock::new(lifecycle),
                clients: Arc::new(RwLock::new(Clients::new())),
                event_tx,
                notification_keys: AtomicU64::new(1),
            },
            event_rx,
        ))
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.lifecycle.read().await.state()
    }

    pub async fn script_url(&self) -> Url {
        self.lifecycle.read().await.script_url.clone()
    }

    /// Pages known to this worker.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, state: ServiceWorkerState) {
        self.emit(WorkerEvent::StateChange {
            worker_id: self.id,
            state,
        });
    }

    /// Install: store the whole app shell or fail.
    ///
    /// Nothing is written unless every asset fetched with an ok status. A failed
    /// install leaves the worker redundant; the platform decides about retrying.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.lifecycle.write().await.begin_install()?;
        self.emit_state(ServiceWorkerState::Installing);

        if let Err(e) = self.precache().await {
            warn!(worker = self.id.raw(), error = %e, "Install failed");
            self.lifecycle.write().await.install_failed();
            self.emit_state(ServiceWorkerState::Redundant);
            return Err(e);
        }

        let state = {
            let mut lifecycle = self.lifecycle.write().await;
            if self.config.skip_waiting_on_install {
                lifecycle.skip_waiting();
            }
            lifecycle.install_succeeded()?
        };
        self.emit_state(state);
        Ok(())
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let requests = self
            .config
            .static_assets
            .iter()
            .map(|path| self.config.resolve(path).map(Request::get))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid_config)?;

        let responses = try_join_all(requests.iter().map(|request| async move {
            let response = self.fetcher.fetch(request.clone()).await.map_err(|e| {
                ServiceWorkerError::InstallFailed {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if !is_cacheable(request, &response) {
                return Err(ServiceWorkerError::InstallFailed {
                    url: request.url.to_string(),
                    reason: format!("{} {} response", response.status, response.response_type.as_str()),
                });
            }
            Ok::<_, ServiceWorkerError>(response)
        }))
        .await?;

        let bucket = &self.config.caches.static_name;
        self.caches.open(bucket).await?;
        for (request, response) in requests.iter().zip(&responses) {
            self.caches.put(bucket, request, response).await?;
        }

        info!(worker = self.id.raw(), cache = %bucket, assets = responses.len(), "App shell cached");
        Ok(responses.len())
    }

    /// Activate: delete every bucket that is not current, then claim clients.
    ///
    /// Deletions run concurrently and fail independently. Returns the names of
    /// the deleted buckets.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        {
            let mut lifecycle = self.lifecycle.write().await;
            let before = lifecycle.state();
            lifecycle.begin_activate()?;
            if before != ServiceWorkerState::Activating {
                self.emit_state(ServiceWorkerState::Activating);
            }
        }

        let names = match self.caches.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list caches");
                Vec::new()
            }
        };
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| !self.config.caches.is_current(name))
            .collect();

        let results = join_all(stale.iter().map(|name| async move {
            (name, self.caches.delete(name).await)
        }))
        .await;

        let mut deleted = Vec::new();
        for (name, result) in results {
            match result {
                Ok(true) => {
                    info!(cache = %name, "Deleted old cache");
                    deleted.push(name.clone());
                }
                Ok(false) => {}
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
            }
        }

        let count = self.clients.write().await.claim(self.id);
        self.emit(WorkerEvent::ClientsClaimed {
            worker_id: self.id,
            count,
        });

        self.lifecycle.write().await.activated()?;
        self.emit_state(ServiceWorkerState::Activated);
        Ok(deleted)
    }

    /// Fetch: classify and run the matching strategy. Before activation,
    /// requests go straight to the network.
    pub async fn fetch(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        if !self.state().await.can_intercept_fetch() {
            trace!(url = %request.url, "Worker not active, passing through");
            return self.strategies.bypass(request).await;
        }
        let route = self.router.classify(&request);
        self.strategies.run(route, request).await
    }

    /// Handle a control message from the page.
    pub async fn message(&self, message: WorkerMessage) -> Result<(), ServiceWorkerError> {
        debug!(kind = message.kind(), "Message received");
        match message {
            WorkerMessage::SkipWaiting => {
                if self.lifecycle.write().await.skip_waiting() {
                    self.emit_state(ServiceWorkerState::Activating);
                }
                Ok(())
            }
            WorkerMessage::UpdateCache { urls } => self.update_cache(&urls).await.map(|_| ()),
            WorkerMessage::Unknown => {
                debug!("Ignoring unknown message type");
                Ok(())
            }
        }
    }

    /// Handle a raw `postMessage` payload. Malformed envelopes are logged and dropped.
    pub async fn message_json(&self, json: &str) -> Result<(), ServiceWorkerError> {
        match WorkerMessage::parse(json) {
            Ok(message) => self.message(message).await,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                Ok(())
            }
        }
    }

    /// Fetch `urls` and store them in the dynamic bucket, all or nothing.
    pub async fn update_cache(&self, urls: &[String]) -> Result<usize, ServiceWorkerError> {
        if urls.is_empty() {
            return Ok(0);
        }

        let requests = urls
            .iter()
            .map(|u| self.config.resolve(u).map(Request::get))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServiceWorkerError::InvalidMessage(e.to_string()))?;

        let responses = try_join_all(requests.iter().map(|request| async move {
            let response = self.fetcher.fetch(request.clone()).await?;
            if !is_cacheable(request, &response) {
                return Err(ServiceWorkerError::NetworkError(format!(
                    "{} returned {} {}",
                    request.url,
                    response.status,
                    response.response_type.as_str()
                )));
            }
            Ok::<_, ServiceWorkerError>(response)
        }))
        .await?;

        let bucket = &self.config.caches.dynamic_name;
        for (request, response) in requests.iter().zip(&responses) {
            self.caches.put(bucket, request, response).await?;
        }

        info!(cache = %bucket, count = responses.len(), "Cache updated on request");
        Ok(responses.len())
    }

    /// Show the festival notification for a push.
    pub fn push(&self, payload: Option<PushPayload>) -> Notification {
        let key = self.notification_keys.fetch_add(1, Ordering::Relaxed);
        let notification = Notification::for_push(&self.config.notification, payload.as_ref(), key);
        debug!(primary_key = key, body = %notification.body, "Showing notification");
        self.emit(WorkerEvent::ShowNotification(notification.clone()));
        notification
    }

    /// Close the notification; `explore` focuses or opens the site.
    pub async fn notification_click(&self, click: NotificationClick) -> Result<(), ServiceWorkerError> {
        self.emit(WorkerEvent::CloseNotification {
            primary_key: click.primary_key,
        });

        if !click.is_explore() {
            return Ok(());
        }

        let url = self
            .config
            .resolve(&self.config.notification.open_path)
            .map_err(invalid_config)?;
        let mut clients = self.clients.write().await;
        let existing = clients.find_window(&url).map(|c| c.id.clone());
        match existing {
            Some(client_id) => {
                clients.focus(&client_id)?;
                self.emit(WorkerEvent::FocusClient { client_id });
            }
            None => {
                let client = clients.open_window(url.clone());
                self.emit(WorkerEvent::OpenWindow {
                    client_id: client.id,
                    url,
                });
            }
        }
        Ok(())
    }

    /// Mark this version redundant (replaced or unregistered).
    pub async fn retire(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state() != ServiceWorkerState::Redundant {
            lifecycle.retire();
            self.emit_state(ServiceWorkerState::Redundant);
        }
    }
}

impl ServiceWorkerHooks for FestivalWorker {
    fn on_install(&self) -> BoxFuture<'_, Result<(), ServiceWorkerError>> {
        Box::pin(self.install())
    }

    fn on_activate(&self) -> BoxFuture<'_, Result<(), ServiceWorkerError>> {
        Box::pin(async move { self.activate().await.map(|_| ()) })
    }

    fn on_fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, ServiceWorkerError>> {
        Box::pin(self.fetch(request))
    }

    fn on_message(&self, message: WorkerMessage) -> BoxFuture<'_, Result<(), ServiceWorkerError>> {
        Box::pin(self.message(message))
    }

    fn on_push(&self, payload: Option<PushPayload>) -> BoxFuture<'_, Result<(), ServiceWorkerError>> {
        self.push(payload);
        Box::pin(futures::future::ready(Ok(())))
    }

    fn on_notification_click(
        &self,
        click: NotificationClick,
    ) -> BoxFuture<'_, Result<(), ServiceWorkerError>> {
        Box::pin(self.notification_click(click))
    }
}

fn invalid_config(e: url::ParseError) -> ServiceWorkerError {
    ServiceWorkerError::Config(e.to_string())
}
