//! Lifecycle controller: the install, activate and fetch handlers of one
//! deployed version.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, info};
use url::Url;
use webchordr_net::{Network, Request, Response};

use crate::clients::{ClientId, ClientRegistry};
use crate::config::{VersionId, WorkerConfig};
use crate::notifier::notify_version_update;
use crate::partition::{PartitionNames, PartitionRole};
use crate::router::{Routed, Router};
use crate::store::{CacheKey, CacheStore};
use crate::sweep::{sweep, SweepReport};
use crate::WorkerError;

// ==================== State ====================

/// Lifecycle state of a worker, advanced by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Install handler running.
    Installing,
    /// Installed, waiting for older versions to let go.
    Waiting,
    /// Activate handler running.
    Activating,
    /// Controlling clients and handling fetches.
    Active,
    /// Failed or replaced.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

// ==================== Events ====================

/// Install signal.
#[derive(Debug, Default)]
pub struct InstallEvent {
    skip_waiting: bool,
}

impl InstallEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the host to activate as soon as install succeeds.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    pub fn skips_waiting(&self) -> bool {
        self.skip_waiting
    }
}

/// Activate signal.
#[derive(Debug, Clone, Default)]
pub struct ActivateEvent {
    /// Version being replaced, if any.
    pub previous: Option<VersionId>,
}

/// Fetch signal.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    pub client_id: Option<ClientId>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// Handlers a host invokes for each lifecycle signal.
///
/// Awaiting `on_install` and `on_activate` keeps the worker alive until their
/// work is done. The value returned by `on_fetch` is what the request is
/// answered with.
#[async_trait]
pub trait WorkerHandlers: Send + Sync {
    /// Version this worker serves.
    fn version(&self) -> &VersionId;

    async fn on_install(&self, event: &mut InstallEvent) -> Result<(), WorkerError>;

    async fn on_activate(&self, event: &ActivateEvent) -> Result<(), WorkerError>;

    async fn on_fetch(&self, event: FetchEvent) -> Option<Routed>;
}

// ==================== Worker ====================

/// What activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub sweep: SweepReport,
    pub claimed: usize,
    pub notified: usize,
}

/// The offline cache for one deployed version.
pub struct CacheWorker {
    config: Arc<WorkerConfig>,
    partitions: PartitionNames,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    clients: Arc<dyn ClientRegistry>,
    router: Router,
}

impl CacheWorker {
    /// Create a worker. Fails if a configured path does not resolve.
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        clients: Arc<dyn ClientRegistry>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let partitions = config.partitions();
        let router = Router::new(
            partitions.clone(),
            config.shell_url()?,
            Arc::clone(&store),
            Arc::clone(&network),
        );

        Ok(Self {
            config,
            partitions,
            store,
            network,
            clients,
            router,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn partitions(&self) -> &PartitionNames {
        &self.partitions
    }

    /// Precache the manifest into the shell and asset partitions.
    ///
    /// Each partition is written only after every one of its entries was
    /// fetched successfully; any failure fails the whole install.
    pub async fn install(&self) -> Result<(), WorkerError> {
        info!(version = %self.config.version, "Install the service worker");

        futures::try_join!(
            self.precache(PartitionRole::Shell),
            self.precache(PartitionRole::Assets),
        )?;

        info!(version = %self.config.version, "Precache complete");
        Ok(())
    }

    async fn precache(&self, role: PartitionRole) -> Result<(), WorkerError> {
        let urls = self.config.manifest.resolve(role, &self.config.origin)?;
        let partition = self.partitions.name(role);

        self.store.open(partition).await?;
        debug!(partition, count = urls.len(), "Add URLs to the cache");

        let entries = self.add_all(urls).await?;
        self.store.put_all(partition, entries).await?;
        Ok(())
    }

    async fn add_all(&self, urls: Vec<Url>) -> Result<Vec<(CacheKey, Response)>, WorkerError> {
        let fetched = join_all(urls.into_iter().map(|url| async move {
            let request = Request::get(url.clone());
            (url, self.network.fetch(&request).await)
        }))
        .await;

        fetched
            .into_iter()
            .map(|(url, result)| match result {
                Ok(response) if response.ok() => Ok((CacheKey::get(url), response)),
                Ok(response) => Err(WorkerError::Install {
                    url,
                    reason: format!("status {}", response.status),
                }),
                Err(e) => Err(WorkerError::Install {
                    url,
                    reason: e.to_string(),
                }),
            })
            .collect()
    }

    /// Sweep stale partitions, claim open clients, then announce the version.
    pub async fn activate(&self) -> Result<ActivationReport, WorkerError> {
        let version = &self.config.version;

        let sweep = sweep(self.store.as_ref(), &self.partitions)
            .await
            .map_err(|e| WorkerError::Activation(format!("cannot enumerate partitions: {}", e)))?;

        let claimed = self.clients.claim(version).await?;
        info!(version = %version, claimed, "Service worker is ready");

        let notified = notify_version_update(self.clients.as_ref(), version).await;

        Ok(ActivationReport {
            sweep,
            claimed,
            notified,
        })
    }

    /// Answer one intercepted request.
    pub async fn fetch(&self, request: &Request) -> Option<Routed> {
        self.router.route(request).await
    }
}

#[async_trait]
impl WorkerHandlers for CacheWorker {
    fn version(&self) -> &VersionId {
        &self.config.version
    }

    async fn on_install(&self, event: &mut InstallEvent) -> Result<(), WorkerError> {
        event.skip_waiting();
        self.install().await.map_err(|e| {
            error!(version = %self.config.version, category = e.category(), error = %e, "Install failed");
            e
        })
    }

    async fn on_activate(&self, event: &ActivateEvent) -> Result<(), WorkerError> {
        match self.activate().await {
            Ok(report) => {
                info!(
                    version = %self.config.version,
                    previous = ?event.previous.as_ref().map(VersionId::as_str),
                    deleted = report.sweep.deleted.len(),
                    notified = report.notified,
                    "Activated"
                );
                Ok(())
            }
            Err(e) => {
                error!(version = %self.config.version, category = e.category(), error = %e, "Activation failed");
                Err(e)
            }
        }
    }

    async fn on_fetch(&self, event: FetchEvent) -> Option<Routed> {
        self.fetch(&event.request).await
    }
}
