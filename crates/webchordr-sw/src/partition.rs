//! Partition naming policy.
//!
//! The `shell` partition is versioned (`shell:<version>`) and replaced on
//! every release. The `assets` partition keeps one fixed name across
//! releases so fonts and images are not downloaded again.

use std::fmt;

use crate::config::VersionId;

/// Name of the unversioned asset partition.
pub const ASSETS_PARTITION: &str = "assets";

/// Role of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionRole {
    /// Root document, manifest, bundles and the catalog.
    Shell,
    /// Fonts, icons and images.
    Assets,
}

impl PartitionRole {
    pub const ALL: [PartitionRole; 2] = [PartitionRole::Shell, PartitionRole::Assets];

    pub fn as_str(self) -> &'static str {
        match self {
            PartitionRole::Shell => "shell",
            PartitionRole::Assets => "assets",
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The partitions one version expects to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    shell: String,
    assets: String,
}

impl PartitionNames {
    pub fn for_version(version: &VersionId) -> Self {
        Self {
            shell: format!("{}:{}", PartitionRole::Shell, version),
            assets: ASSETS_PARTITION.to_string(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn assets(&self) -> &str {
        &self.assets
    }

    pub fn name(&self, role: PartitionRole) -> &str {
        match role {
            PartitionRole::Shell => &self.shell,
            PartitionRole::Assets => &self.assets,
        }
    }

    /// Every partition name the version owns, in lookup order.
    pub fn expected(&self) -> [&str; 2] {
        [self.shell.as_str(), self.assets.as_str()]
    }

    pub fn is_expected(&self, name: &str) -> bool {
        self.shell == name || self.assets == name
    }
}
