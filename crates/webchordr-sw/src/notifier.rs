//! Version-change broadcast.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::clients::{ClientNotification, ClientRegistry};
use crate::config::VersionId;

/// Tell every connected client, controlled or not, that `version` took over.
///
/// Delivery is fire-and-forget: failures are logged and skipped, nothing is
/// retried. Returns how many clients the message was handed to.
pub async fn notify_version_update(clients: &dyn ClientRegistry, version: &VersionId) -> usize {
    let targets = match clients.match_all(true).await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(version = %version, error = %e, "Could not enumerate clients for update notice");
            return 0;
        }
    };

    let message = ClientNotification::version_update(version);
    let results = join_all(
        targets
            .iter()
            .map(|client| clients.post_message(*client, &message)),
    )
    .await;

    let mut delivered = 0;
    for (client, result) in targets.iter().zip(results) {
        match result {
            Ok(()) => delivered += 1,
            Err(e) => warn!(client = %client, error = %e, "Update notice not delivered"),
        }
    }

    debug!(version = %version, delivered, total = targets.len(), "Clients notified");
    delivered
}
