//! Connected application instances and the messages sent to them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use url::Url;

use crate::config::VersionId;

/// Client errors.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Client not found: {0}")]
    NotFound(ClientId),

    #[error("Client disconnected: {0}")]
    Disconnected(ClientId),

    #[error("Claim failed: {0}")]
    ClaimFailed(String),

    #[error("Unsupported message: {0}")]
    UnsupportedMessage(String),
}

/// Unique identifier for a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Message broadcast to application instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientNotification {
    /// A new version took over. Wire form:
    /// `{"type":"VERSION_UPDATE","version":"<id>"}`.
    VersionUpdate { version: VersionId },
}

impl ClientNotification {
    pub fn version_update(version: &VersionId) -> Self {
        Self::VersionUpdate {
            version: version.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        // Only string fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a message on the application side.
    pub fn from_json(data: &str) -> Result<Self, ClientError> {
        serde_json::from_str(data).map_err(|e| ClientError::UnsupportedMessage(e.to_string()))
    }
}

/// Access to the application instances a worker can reach.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Make `version` the controller of every open client.
    /// Returns how many clients were claimed.
    async fn claim(&self, version: &VersionId) -> Result<usize, ClientError>;

    /// Connected clients; uncontrolled ones only when asked for.
    async fn match_all(&self, include_uncontrolled: bool) -> Result<Vec<ClientId>, ClientError>;

    /// Deliver a message to one client.
    async fn post_message(
        &self,
        client: ClientId,
        message: &ClientNotification,
    ) -> Result<(), ClientError>;
}

/// A connected application instance.
#[derive(Debug)]
struct Client {
    url: Url,
    controller: Option<VersionId>,
    sender: mpsc::UnboundedSender<ClientNotification>,
}

/// In-memory client registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<HashMap<ClientId, Client>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an uncontrolled client. Messages posted to it arrive on the
    /// returned receiver.
    pub async fn connect(&self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<ClientNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId::new();
        self.clients.write().await.insert(
            id,
            Client {
                url,
                controller: None,
                sender,
            },
        );
        (id, receiver)
    }

    /// Remove a client.
    pub async fn disconnect(&self, id: ClientId) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    /// Version currently controlling a client.
    pub async fn controller(&self, id: ClientId) -> Option<VersionId> {
        self.clients
            .read()
            .await
            .get(&id)
            .and_then(|c| c.controller.clone())
    }

    /// URL the client was opened at.
    pub async fn url(&self, id: ClientId) -> Option<Url> {
        self.clients.read().await.get(&id).map(|c| c.url.clone())
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ClientRegistry for Clients {
    async fn claim(&self, version: &VersionId) -> Result<usize, ClientError> {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.controller = Some(version.clone());
        }
        Ok(clients.len())
    }

    async fn match_all(&self, include_uncontrolled: bool) -> Result<Vec<ClientId>, ClientError> {
        Ok(self
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, c)| include_uncontrolled || c.controller.is_some())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn post_message(
        &self,
        client: ClientId,
        message: &ClientNotification,
    ) -> Result<(), ClientError> {
        let clients = self.clients.read().await;
        let target = clients.get(&client).ok_or(ClientError::NotFound(client))?;
        target
            .sender
            .send(message.clone())
            .map_err(|_| ClientError::Disconnected(client))
    }
}
