//! Cache store seam and the in-memory implementation.

use std::fmt;

use async_trait::async_trait;
use hashbrown::HashMap;
use http::Method;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;
use webchordr_net::{Request, Response};

/// Errors reported by a cache store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Partition not open: {0}")]
    PartitionMissing(String),

    #[error("Store backend failed: {0}")]
    Backend(String),
}

/// Normalized request identity: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: Url,
}

impl CacheKey {
    pub fn new(method: Method, mut url: Url) -> Self {
        url.set_fragment(None);
        Self { method, url }
    }

    /// Key for a `GET` of `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(request.method.clone(), request.url.clone())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Persistent key → response mapping split into named partitions.
///
/// Individual `put` and `delete` calls are atomic. Nothing spans calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a partition, creating it if missing.
    async fn open(&self, partition: &str) -> Result<(), StoreError>;

    /// Names of all partitions.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Delete a whole partition. Returns whether it existed.
    async fn delete(&self, partition: &str) -> Result<bool, StoreError>;

    /// Look up a key in one partition. A missing partition matches nothing.
    async fn match_request(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<Response>, StoreError>;

    /// Store a response, replacing any previous entry under the key.
    async fn put(&self, partition: &str, key: CacheKey, response: Response)
        -> Result<(), StoreError>;

    /// Store several responses at once.
    async fn put_all(
        &self,
        partition: &str,
        entries: Vec<(CacheKey, Response)>,
    ) -> Result<(), StoreError> {
        for (key, response) in entries {
            self.put(partition, key, response).await?;
        }
        Ok(())
    }
}

/// One named partition.
#[derive(Debug, Default)]
struct Partition {
    name: String,
    entries: HashMap<CacheKey, Response>,
}

impl Partition {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }
}

/// In-process cache store. Partitions keep their creation order.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    partitions: RwLock<Vec<Partition>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a partition exists.
    pub async fn has(&self, partition: &str) -> bool {
        self.partitions.read().await.iter().any(|p| p.name == partition)
    }

    /// Keys stored in a partition, or `None` if it does not exist.
    pub async fn entries(&self, partition: &str) -> Option<Vec<CacheKey>> {
        self.partitions
            .read()
            .await
            .iter()
            .find(|p| p.name == partition)
            .map(|p| p.entries.keys().cloned().collect())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write().await;
        if !partitions.iter().any(|p| p.name == partition) {
            partitions.push(Partition::new(partition));
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .partitions
            .read()
            .await
            .iter()
            .map(|p| p.name.clone())
            .collect())
    }

    async fn delete(&self, partition: &str) -> Result<bool, StoreError> {
        let mut partitions = self.partitions.write().await;
        let before = partitions.len();
        partitions.retain(|p| p.name != partition);
        Ok(partitions.len() != before)
    }

    async fn match_request(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<Response>, StoreError> {
        Ok(self
            .partitions
            .read()
            .await
            .iter()
            .find(|p| p.name == partition)
            .and_then(|p| p.entries.get(key))
            .map(Response::duplicate))
    }

    async fn put(
        &self,
        partition: &str,
        key: CacheKey,
        response: Response,
    ) -> Result<(), StoreError> {
        self.put_all(partition, vec![(key, response)]).await
    }

    async fn put_all(
        &self,
        partition: &str,
        entries: Vec<(CacheKey, Response)>,
    ) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write().await;
        let target = partitions
            .iter_mut()
            .find(|p| p.name == partition)
            .ok_or_else(|| StoreError::PartitionMissing(partition.to_string()))?;
        target.entries.extend(entries);
        Ok(())
    }
}
