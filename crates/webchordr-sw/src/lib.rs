//! # webchordr SW
//!
//! Versioned offline request cache for the webchordr single-page application.
//!
//! ## Features
//!
//! - **Lifecycle**: install, activate and fetch handlers for one deployed version
//! - **Partitions**: a versioned `shell` partition and an unversioned `assets` partition
//! - **Precache**: the application shell and static assets are stored at install time
//! - **Routing**: cache hit, shell fallback for navigations, or fetch-and-store
//! - **Invalidation**: stale partitions are swept on activation
//! - **Clients**: open application instances are claimed and told about the new version
//!
//! ## Architecture
//!
//! ```text
//! Registration (host)
//!     ├── installing ─┐
//!     ├── waiting    ─┼── CacheWorker (WorkerHandlers)
//!     └── active     ─┘       ├── Router ── classify()
//!                             ├── sweep()
//!                             └── notify_version_update()
//!
//! CacheStore
//!     ├── shell:<version>
//!     └── assets
//!             └── CacheKey → Response
//! ```

use thiserror::Error;
use url::Url;

pub mod classify;
pub mod clients;
pub mod config;
pub mod manifest;
pub mod notifier;
pub mod partition;
pub mod registration;
pub mod router;
pub mod store;
pub mod sweep;
pub mod worker;

pub use classify::{classify, is_cacheable_method, RequestClass};
pub use clients::{ClientError, ClientId, ClientNotification, ClientRegistry, Clients};
pub use config::{ConfigError, VersionId, WorkerConfig};
pub use manifest::{BundlePaths, PrecacheManifest};
pub use notifier::notify_version_update;
pub use partition::{PartitionNames, PartitionRole, ASSETS_PARTITION};
pub use registration::{Registration, RegistrationEvent, WorkerSlot};
pub use router::{ResponseSource, Routed, Router};
pub use store::{CacheKey, CacheStore, MemoryCacheStore, StoreError};
pub use sweep::{sweep, SweepReport};
pub use worker::{
    ActivateEvent, ActivationReport, CacheWorker, FetchEvent, InstallEvent, WorkerHandlers,
    WorkerState,
};

// ==================== Errors ====================

/// Errors raised by the install and activate handlers.
///
/// Fetch handling never returns an error; a failed fetch resolves to no
/// response.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Precache of {url} failed: {reason}")]
    Install { url: Url, reason: String },

    #[error("Activation aborted: {0}")]
    Activation(String),

    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("Client error: {0}")]
    Claim(#[from] ClientError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(String),
}

impl WorkerError {
    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            WorkerError::Install { .. } => "install",
            WorkerError::Activation(_) => "activation",
            WorkerError::Store(_) => "store",
            WorkerError::Claim(_) => "claim",
            WorkerError::Config(_) => "config",
            WorkerError::State(_) => "state",
        }
    }
}
