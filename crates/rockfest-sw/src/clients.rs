//! Pages the worker controls or can open.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A window client nobody controls yet.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Options for `clients.matchAll()`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
    /// Only clients controlled by this worker (ignored with `include_uncontrolled`).
    pub controlled_by: Option<ServiceWorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match all clients.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| {
                if !options.include_uncontrolled {
                    match options.controlled_by {
                        Some(worker) if c.controller != Some(worker) => return false,
                        None if c.controller.is_none() => return false,
                        _ => {}
                    }
                }
                match options.client_type {
                    ClientType::All => true,
                    t => c.client_type == t,
                }
            })
            .collect()
    }

    /// Take control of every window client. Returns how many changed controller.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.client_type == ClientType::Window && client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }

    /// Open a focused window at `url`.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        self.add(client.clone());
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<&Client, ServiceWorkerError> {
        let is_window = self
            .clients
            .get(id)
            .map(|c| c.client_type == ClientType::Window)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if !is_window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))
    }

    /// First window client whose URL equals `url`, controlled or not.
    pub fn find_window(&self, url: &Url) -> Option<&Client> {
        let windows = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
            controlled_by: None,
        };
        self.match_all(&windows).into_iter().find(|c| &c.url == url)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(path: &str) -> Url {
        Url::parse("https://rockfest.example/").unwrap().join(path).unwrap()
    }

    #[test]
    fn test_open_window_focuses_only_new_client() {
        let mut clients = Clients::new();
        let first = clients.open_window(page("/"));
        let second = clients.open_window(page("/lineup"));

        assert!(second.focused);
        assert!(!clients.get(&first.id).unwrap().focused);
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_claim_counts_changes() {
        let mut clients = Clients::new();
        clients.add(Client::window(page("/")));
        clients.add(Client::window(page("/gallery")));
        let mut worker_client = Client::window(page("/sw.js"));
        worker_client.client_type = ClientType::Worker;
        clients.add(worker_client);

        let worker = ServiceWorkerId::new();
        assert_eq!(clients.claim(worker), 2);
        assert_eq!(clients.claim(worker), 0);
    }

    #[test]
    fn test_match_all_filters_by_controller() {
        let mut clients = Clients::new();
        clients.add(Client::window(page("/")));
        let worker = ServiceWorkerId::new();
        let other = ServiceWorkerId::new();

        let controlled = ClientMatchOptions {
            controlled_by: Some(worker),
            ..Default::default()
        };
        assert!(clients.match_all(&controlled).is_empty());

        let everyone = ClientMatchOptions {
            include_uncontrolled: true,
            ..Default::default()
        };
        assert_eq!(clients.match_all(&everyone).len(), 1);

        clients.claim(worker);
        assert_eq!(clients.match_all(&controlled).len(), 1);
        let by_other = ClientMatchOptions {
            controlled_by: Some(other),
            ..Default::default()
        };
        assert!(clients.match_all(&by_other).is_empty());
    }

    #[test]
    fn test_focus() {
        let mut clients = Clients::new();
        let home = Client::window(page("/"));
        let id = home.id.clone();
        clients.add(home);
        clients.open_window(page("/quiz"));

        let focused = clients.focus(&id).unwrap();
        assert!(focused.focused);
        assert!(clients.focus("client-missing").is_err());
    }

    #[test]
    fn test_find_window() {
        let mut clients = Clients::new();
        clients.add(Client::window(page("/")));
        assert!(clients.find_window(&page("/")).is_some());
        assert!(clients.find_window(&page("/map")).is_none());
    }

    #[test]
    fn test_find_window_skips_workers_and_sees_controlled() {
        let mut clients = Clients::new();
        let mut worker_client = Client::window(page("/lineup"));
        worker_client.client_type = ClientType::Worker;
        clients.add(worker_client);
        assert!(clients.find_window(&page("/lineup")).is_none());

        clients.add(Client::window(page("/lineup")));
        clients.claim(ServiceWorkerId::new());
        let found = clients.find_window(&page("/lineup")).unwrap();
        assert_eq!(found.client_type, ClientType::Window);
        assert!(found.controller.is_some());
    }
}
