//! Precache manifest: what gets stored before any request asks for it.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ConfigError;
use crate::partition::PartitionRole;

/// Hashed bundle paths the build pipeline substitutes into the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePaths {
    /// Compiled JavaScript glue for the application.
    pub script: String,
    /// The application's WASM binary.
    pub wasm: String,
    /// Sortable list helper script.
    pub sortable: String,
}

#[derive(Deserialize)]
struct ManifestLists {
    #[serde(default)]
    shell: Vec<String>,
    #[serde(default)]
    assets: Vec<String>,
}

impl From<ManifestLists> for PrecacheManifest {
    fn from(lists: ManifestLists) -> Self {
        PrecacheManifest::new(lists.shell, lists.assets)
    }
}

/// Ordered, duplicate-free resource paths per partition role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ManifestLists")]
pub struct PrecacheManifest {
    shell: Vec<String>,
    assets: Vec<String>,
}

impl PrecacheManifest {
    /// Build a manifest. Later duplicates within a role are dropped.
    pub fn new<S, A>(shell: S, assets: A) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            shell: dedup(shell),
            assets: dedup(assets),
        }
    }

    /// The webchordr application manifest.
    pub fn webchordr(bundles: &BundlePaths) -> Self {
        Self::new(
            [
                "/",
                "/manifest.json",
                "/stylesheets/chordr-app.css",
                bundles.script.as_str(),
                bundles.wasm.as_str(),
                bundles.sortable.as_str(),
                "/catalog.json",
            ],
            [
                "/assets/fonts/libre-baskerville-v7-latin_latin-ext-regular.woff2",
                "/assets/fonts/merriweather-v21-latin-regular.woff2",
                "/assets/fonts/merriweather-v21-latin-700.woff2",
                "/assets/icons/fonts/iconmonstr-iconic-font.woff2?v=1.3.0",
                "/assets/images/logo-512-light.png",
                "/assets/images/logo-32-light.png",
            ],
        )
    }

    pub fn shell(&self) -> &[String] {
        &self.shell
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Paths for the given role.
    pub fn entries(&self, role: PartitionRole) -> &[String] {
        match role {
            PartitionRole::Shell => &self.shell,
            PartitionRole::Assets => &self.assets,
        }
    }

    pub fn len(&self) -> usize {
        self.shell.len() + self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the paths of one role against `origin`.
    pub fn resolve(&self, role: PartitionRole, origin: &Url) -> Result<Vec<Url>, ConfigError> {
        self.entries(role)
            .iter()
            .map(|path| {
                origin.join(path).map_err(|e| ConfigError::InvalidPath {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn dedup<I>(items: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(Into::into)
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
