//! Deletion of partitions left behind by previous versions.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::partition::PartitionNames;
use crate::store::{CacheStore, StoreError};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Partitions that belong to the current version.
    pub kept: Vec<String>,
    /// Stale partitions that were removed.
    pub deleted: Vec<String>,
    /// Stale partitions whose deletion failed.
    pub failed: Vec<String>,
}

/// Delete every partition not named in `current`.
///
/// Fails only if the partitions cannot be enumerated. Individual deletions
/// run independently and their failures are logged and reported.
pub async fn sweep(
    store: &dyn CacheStore,
    current: &PartitionNames,
) -> Result<SweepReport, StoreError> {
    let names = store.keys().await?;
    let (kept, stale): (Vec<String>, Vec<String>) =
        names.into_iter().partition(|name| current.is_expected(name));

    let results = join_all(stale.iter().map(|name| store.delete(name))).await;

    let mut report = SweepReport {
        kept,
        ..Default::default()
    };
    for (name, result) in stale.into_iter().zip(results) {
        match result {
            Ok(_) => {
                debug!(partition = %name, "Clear cache");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(partition = %name, error = %e, "Could not clear cache");
                report.failed.push(name);
            }
        }
    }

    Ok(report)
}
