//! Worker configuration, built once per deployed version.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::manifest::PrecacheManifest;
use crate::partition::{PartitionNames, PartitionRole};

fn default_shell_document() -> String {
    "/".to_string()
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Version identifier must not be empty")]
    EmptyVersion,

    #[error("Version identifier {0:?} has surrounding whitespace")]
    PaddedVersion(String),

    #[error("Cannot resolve {path:?} against the worker origin: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Opaque token identifying one deployed build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Create a version identifier. The token is kept byte for byte, so
    /// blank or whitespace-padded input is rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }
        if id.trim() != id {
            return Err(ConfigError::PaddedVersion(id));
        }
        Ok(Self(id))
    }

    /// The identifier injected at build time through `WEBCHORDR_SW_VERSION`,
    /// or the crate version when the build did not set one.
    pub fn from_build_env() -> Self {
        option_env!("WEBCHORDR_SW_VERSION")
            .and_then(|v| Self::new(v).ok())
            .unwrap_or_else(|| Self(env!("CARGO_PKG_VERSION").to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VersionId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionId> for String {
    fn from(value: VersionId) -> Self {
        value.0
    }
}

/// Immutable configuration shared by every component of one worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Identifier of the deployed build.
    pub version: VersionId,

    /// Worker scope; manifest paths are resolved against it.
    pub origin: Url,

    /// Root document served for navigational requests.
    #[serde(default = "default_shell_document")]
    pub shell_document: String,

    /// Resources stored at install time.
    #[serde(default)]
    pub manifest: PrecacheManifest,
}

impl WorkerConfig {
    /// Create a configuration with an empty manifest.
    pub fn new(version: VersionId, origin: Url) -> Self {
        Self {
            version,
            origin,
            shell_document: default_shell_document(),
            manifest: PrecacheManifest::default(),
        }
    }

    /// Parse the JSON emitted by the build pipeline.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the precache manifest.
    pub fn with_manifest(mut self, manifest: PrecacheManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Set the root document path.
    pub fn with_shell_document(mut self, path: impl Into<String>) -> Self {
        self.shell_document = path.into();
        self
    }

    /// Partition names for this version.
    pub fn partitions(&self) -> PartitionNames {
        PartitionNames::for_version(&self.version)
    }

    /// Resolve a path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        let mut url = self.origin.join(path).map_err(|e| ConfigError::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        url.set_fragment(None);
        Ok(url)
    }

    /// Absolute URL of the root document.
    pub fn shell_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.shell_document)
    }

    /// Check that every configured path resolves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shell_url()?;
        for role in PartitionRole::ALL {
            self.manifest.resolve(role, &self.origin)?;
        }
        Ok(())
    }
}
