//! Open pages that a worker can control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use hypercat_net::NetError;
use url::Url;

use crate::lifecycle::WorkerId;
use crate::SwError;

/// A client (open page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    /// Worker currently serving this page's requests.
    pub controller: Option<WorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened page. It starts uncontrolled.
    pub fn open(&mut self, url: &str) -> Result<Client, SwError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;

        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        let client = Client {
            id: id.clone(),
            url,
            controller: None,
        };

        self.clients.insert(id, client.clone());
        Ok(client)
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Make `worker` the controller of every page on `origin`.
    ///
    /// Returns how many pages changed controller.
    pub fn claim(&mut self, worker: WorkerId, origin: &str) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.url.origin().ascii_serialization() == origin
                && client.controller != Some(worker)
            {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }

    /// Pages controlled by `worker`.
    pub fn controlled_by(&self, worker: WorkerId) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .collect()
    }
}
