//! Per-request serving strategy.
//!
//! Rules, first match wins:
//!
//! 1. Non-`GET` requests go straight to the network and are never stored.
//! 2. A stored entry in the current version's partitions is served as is.
//! 3. A navigational request is answered with the stored root document.
//! 4. Everything else is fetched; `200` basic responses are stored in the
//!    shell partition on the way back.

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;
use webchordr_net::{Network, Request, Response};

use crate::classify::{classify, is_cacheable_method, RequestClass};
use crate::partition::PartitionNames;
use crate::store::{CacheKey, CacheStore};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The genuine network response.
    Network,
    /// A stored copy of the request's own entry.
    Cache,
    /// The stored root document, standing in for a navigation.
    ShellFallback,
}

/// A response together with its source.
#[derive(Debug)]
pub struct Routed {
    pub response: Response,
    pub source: ResponseSource,
}

impl Routed {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// Routes intercepted requests for one version.
pub struct Router {
    partitions: PartitionNames,
    shell_key: CacheKey,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
}

impl Router {
    /// Create a router. `shell_url` is the root document served for
    /// navigational misses.
    pub fn new(
        partitions: PartitionNames,
        shell_url: Url,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            partitions,
            shell_key: CacheKey::get(shell_url),
            store,
            network,
        }
    }

    /// Decide how to answer `request`. `None` means the network failed and
    /// nothing could be served.
    pub async fn route(&self, request: &Request) -> Option<Routed> {
        if !is_cacheable_method(&request.method) {
            debug!(url = %request.url, method = %request.method, "Pass through");
            return self
                .fetch(request)
                .await
                .map(|response| Routed::new(response, ResponseSource::Network));
        }

        let key = CacheKey::for_request(request);
        if let Some(response) = self.lookup(&key).await {
            debug!(url = %request.url, "Serve cached version");
            return Some(Routed::new(response, ResponseSource::Cache));
        }

        if classify(request.url.path()) == RequestClass::Navigational {
            if let Some(shell) = self.match_in(self.partitions.shell(), &self.shell_key).await {
                debug!(url = %request.url, "Serve shell document");
                return Some(Routed::new(shell, ResponseSource::ShellFallback));
            }
            debug!(url = %request.url, "Shell document not cached");
        }

        info!(url = %request.url, "Live load from server");
        let response = self.fetch(request).await?;
        if response.is_storable() {
            self.stash(key, &response).await;
        }
        Some(Routed::new(response, ResponseSource::Network))
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        for partition in self.partitions.expected() {
            if let Some(response) = self.match_in(partition, key).await {
                return Some(response);
            }
        }
        None
    }

    async fn match_in(&self, partition: &str, key: &CacheKey) -> Option<Response> {
        match self.store.match_request(partition, key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(partition, key = %key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Option<Response> {
        match self.network.fetch(request).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Failed to fetch");
                None
            }
        }
    }

    /// Store a copy of `response` in the shell partition, opening it if
    /// needed. A fetch still in flight on a replaced version can recreate
    /// that version's partition after the sweep; the next activation sweeps
    /// it again.
    async fn stash(&self, key: CacheKey, response: &Response) {
        let partition = self.partitions.shell();
        let stored = match self.store.open(partition).await {
            Ok(()) => self.store.put(partition, key, response.duplicate()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!(partition, url = %response.url, error = %e, "Could not stash response");
        }
    }
}
