//! Host-side registration that drives workers through their lifecycle.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use url::Url;
use webchordr_net::{Network, Request};

use crate::clients::ClientId;
use crate::config::VersionId;
use crate::router::{ResponseSource, Routed};
use crate::worker::{ActivateEvent, FetchEvent, InstallEvent, WorkerHandlers, WorkerState};
use crate::WorkerError;

/// Registration events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// A worker changed state.
    StateChange {
        version: VersionId,
        state: WorkerState,
    },
    /// A new version controls the registration's clients.
    ControllerChange { version: VersionId },
}

/// A worker together with its lifecycle state.
#[derive(Clone)]
pub struct WorkerSlot {
    handlers: Arc<dyn WorkerHandlers>,
    state: WorkerState,
    state_changed_at: Instant,
}

impl WorkerSlot {
    fn new(handlers: Arc<dyn WorkerHandlers>) -> Self {
        Self {
            handlers,
            state: WorkerState::Installing,
            state_changed_at: Instant::now(),
        }
    }

    pub fn version(&self) -> &VersionId {
        self.handlers.version()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Time of the last state change.
    pub fn state_changed_at(&self) -> Instant {
        self.state_changed_at
    }

    fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

#[derive(Default)]
struct Slots {
    installing: Option<WorkerSlot>,
    waiting: Option<WorkerSlot>,
    active: Option<WorkerSlot>,
}

/// One worker registration for a scope.
///
/// At most one version is installing, one waiting and one active. A version
/// that fails to install or activate becomes redundant and the previously
/// active version keeps serving.
///
/// The slot lock is held only while slots move. Install and activate
/// handlers run unlocked, so fetches keep reaching the active worker while
/// a newer version is still installing.
pub struct Registration {
    scope: Url,
    network: Arc<dyn Network>,
    slots: RwLock<Slots>,
    event_tx: mpsc::UnboundedSender<RegistrationEvent>,
}

impl Registration {
    /// Create a registration. `network` answers fetches while no worker is
    /// active.
    pub fn new(
        scope: Url,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<RegistrationEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                scope,
                network,
                slots: RwLock::new(Slots::default()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub async fn active(&self) -> Option<WorkerSlot> {
        self.slots.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<WorkerSlot> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn installing(&self) -> Option<WorkerSlot> {
        self.slots.read().await.installing.clone()
    }

    /// Version of the active worker.
    pub async fn active_version(&self) -> Option<VersionId> {
        self.slots
            .read()
            .await
            .active
            .as_ref()
            .map(|slot| slot.version().clone())
    }

    /// Install a new worker and, if it asks to skip waiting, activate it.
    ///
    /// Returns the state the new worker ended in.
    pub async fn update(
        &self,
        worker: Arc<dyn WorkerHandlers>,
    ) -> Result<WorkerState, WorkerError> {
        {
            let mut slots = self.slots.write().await;
            if slots.installing.is_some() {
                return Err(WorkerError::State(
                    "another worker is already installing".to_string(),
                ));
            }
            let slot = WorkerSlot::new(Arc::clone(&worker));
            self.emit_state(&slot);
            slots.installing = Some(slot);
        }

        let mut event = InstallEvent::new();
        let result = worker.on_install(&mut event).await;

        {
            let mut slots = self.slots.write().await;
            let Some(mut slot) = slots.installing.take() else {
                return Err(WorkerError::State("installing worker vanished".to_string()));
            };

            if let Err(e) = result {
                slot.set_state(WorkerState::Redundant);
                self.emit_state(&slot);
                return Err(e);
            }

            slot.set_state(WorkerState::Waiting);
            self.emit_state(&slot);
            if let Some(mut replaced) = slots.waiting.replace(slot) {
                replaced.set_state(WorkerState::Redundant);
                self.emit_state(&replaced);
            }
        }

        if event.skips_waiting() {
            self.activate_waiting().await?;
            return Ok(WorkerState::Active);
        }

        Ok(WorkerState::Waiting)
    }

    /// Activate the waiting worker.
    ///
    /// On failure the waiting worker becomes redundant and the active one is
    /// left in place.
    pub async fn activate_waiting(&self) -> Result<(), WorkerError> {
        let (mut slot, event) = {
            let mut slots = self.slots.write().await;
            let Some(mut slot) = slots.waiting.take() else {
                return Err(WorkerError::State("no waiting worker".to_string()));
            };
            slot.set_state(WorkerState::Activating);
            self.emit_state(&slot);

            let previous = slots.active.as_ref().map(|s| s.version().clone());
            (slot, ActivateEvent { previous })
        };

        if let Err(e) = slot.handlers.on_activate(&event).await {
            warn!(version = %slot.version(), error = %e, "Keeping previous version active");
            slot.set_state(WorkerState::Redundant);
            self.emit_state(&slot);
            return Err(e);
        }

        let version = slot.version().clone();
        let mut slots = self.slots.write().await;
        slot.set_state(WorkerState::Active);
        self.emit_state(&slot);
        if let Some(mut old) = slots.active.replace(slot) {
            old.set_state(WorkerState::Redundant);
            self.emit_state(&old);
        }

        info!(scope = %self.scope, version = %version, "Controller changed");
        let _ = self
            .event_tx
            .send(RegistrationEvent::ControllerChange { version });

        Ok(())
    }

    /// Dispatch a fetch to the active worker, or to the network if there is
    /// none.
    pub async fn handle_fetch(&self, request: Request, client_id: Option<ClientId>) -> Option<Routed> {
        let active = self
            .slots
            .read()
            .await
            .active
            .as_ref()
            .map(|slot| Arc::clone(&slot.handlers));

        match active {
            Some(handlers) => handlers.on_fetch(FetchEvent { request, client_id }).await,
            None => match self.network.fetch(&request).await {
                Ok(response) => Some(Routed {
                    response,
                    source: ResponseSource::Network,
                }),
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Failed to fetch");
                    None
                }
            },
        }
    }

    fn emit_state(&self, slot: &WorkerSlot) {
        let _ = self.event_tx.send(RegistrationEvent::StateChange {
            version: slot.version().clone(),
            state: slot.state(),
        });
    }
}
