//! Router lifecycle: staged rollover between router versions.
//!
//! A host keeps one active router and at most one waiting router. Each
//! client (tab, connection) is controlled by the router that was active
//! when it opened, or by none if it opened before any router was active.
//! A waiting router takes over once no open client is controlled by the
//! active one, or immediately on [`ControlMessage::SkipWaiting`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use carecache_common::{Error, Result};

use crate::network::Network;
use crate::request::{Request, Response};
use crate::router::RequestRouter;

/// An execution context whose requests a router may control.
pub type ClientId = Uuid;

/// Messages accepted on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Activate the waiting router now.
    SkipWaiting,
    /// Make the active router control every open client.
    ClaimClients,
}

/// Where a freshly installed router ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallOutcome {
    Active,
    Waiting,
}

/// Snapshot of the host for status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub clients: usize,
    pub controlled: usize,
}

#[derive(Default)]
struct HostState {
    active: Option<Arc<RequestRouter>>,
    waiting: Option<Arc<RequestRouter>>,
    /// Client to the id of its controlling router.
    clients: HashMap<ClientId, Option<Uuid>>,
}

impl HostState {
    fn active_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|r| r.id())
    }

    /// Activate the waiting router, moving clients of the old one over.
    fn activate_waiting(&mut self) -> bool {
        let Some(next) = self.waiting.take() else {
            return false;
        };
        let previous = self.active_id();
        let next_id = next.id();
        for controller in self.clients.values_mut() {
            if controller.is_some() && *controller == previous {
                *controller = Some(next_id);
            }
        }
        info!("Router {} is now active", next.version());
        self.active = Some(next);
        true
    }

    /// Promote the waiting router if the active one controls no client.
    fn try_promote(&mut self) -> bool {
        if self.waiting.is_none() {
            return false;
        }
        let active = self.active_id();
        let busy = active.is_some() && self.clients.values().any(|c| *c == active);
        if busy {
            return false;
        }
        self.activate_waiting()
    }
}

/// Holds router versions and the clients they control.
pub struct RouterHost {
    state: RwLock<HostState>,
    network: Arc<dyn Network>,
}

impl RouterHost {
    /// `network` answers requests of uncontrolled clients.
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            state: RwLock::new(HostState::default()),
            network,
        }
    }

    /// Install a router version.
    ///
    /// The first router activates at once. Later ones wait for the clients
    /// of the active router to close; a newer install replaces an older
    /// waiting router.
    ///
    /// # Errors
    /// - The router's own install step fails
    pub async fn install(&self, router: RequestRouter) -> Result<InstallOutcome> {
        router.install().await?;
        let router = Arc::new(router);

        let mut state = self.state.write().await;
        if state.active.is_none() {
            info!("Router {} is now active", router.version());
            state.active = Some(router);
            return Ok(InstallOutcome::Active);
        }

        if let Some(replaced) = state.waiting.replace(router) {
            debug!("Waiting router {} replaced", replaced.version());
        }
        if state.try_promote() {
            Ok(InstallOutcome::Active)
        } else {
            Ok(InstallOutcome::Waiting)
        }
    }

    /// Register a new client, controlled by the active router if any.
    pub async fn open_client(&self) -> ClientId {
        let id = Uuid::new_v4();
        let mut state = self.state.write().await;
        let controller = state.active_id();
        state.clients.insert(id, controller);
        id
    }

    /// Forget a client; the waiting router may take over as a result.
    pub async fn close_client(&self, client: ClientId) -> bool {
        let mut state = self.state.write().await;
        let known = state.clients.remove(&client).is_some();
        state.try_promote();
        known
    }

    pub async fn has_client(&self, client: ClientId) -> bool {
        self.state.read().await.clients.contains_key(&client)
    }

    /// Activate the waiting router now. Returns false when none waits.
    pub async fn skip_waiting(&self) -> bool {
        self.state.write().await.activate_waiting()
    }

    /// Put every open client under the active router.
    ///
    /// Returns how many clients changed controller.
    pub async fn claim_clients(&self) -> usize {
        let mut state = self.state.write().await;
        let Some(active) = state.active_id() else {
            return 0;
        };
        let mut claimed = 0;
        for controller in state.clients.values_mut() {
            if *controller != Some(active) {
                *controller = Some(active);
                claimed += 1;
            }
        }
        info!("Active router claimed {} clients", claimed);
        claimed
    }

    pub async fn apply(&self, message: ControlMessage) -> usize {
        match message {
            ControlMessage::SkipWaiting => usize::from(self.skip_waiting().await),
            ControlMessage::ClaimClients => self.claim_clients().await,
        }
    }

    /// The router controlling `client`, if any.
    pub async fn controller(&self, client: ClientId) -> Option<Arc<RequestRouter>> {
        let state = self.state.read().await;
        let controller = state.clients.get(&client).copied().flatten()?;
        state.active.as_ref().filter(|r| r.id() == controller).cloned()
    }

    /// Answer a request on behalf of `client`.
    ///
    /// Requests from clients no active router controls go to the network.
    pub async fn handle(&self, client: ClientId, request: &Request) -> Result<Response> {
        match self.controller(client).await {
            Some(router) => router.handle(request).await,
            None => self.network.fetch(request).await,
        }
    }

    pub async fn status(&self) -> HostStatus {
        let state = self.state.read().await;
        let active = state.active_id();
        HostStatus {
            active: state.active.as_ref().map(|r| r.version().to_string()),
            waiting: state.waiting.as_ref().map(|r| r.version().to_string()),
            clients: state.clients.len(),
            controlled: state
                .clients
                .values()
                .filter(|c| c.is_some() && **c == active)
                .count(),
        }
    }

    /// Start the control loop and return its sending side.
    pub fn control_channel(self: &Arc<Self>) -> ControlSender {
        let (tx, mut rx) = mpsc::channel::<(ControlMessage, oneshot::Sender<usize>)>(16);
        let host = Arc::clone(self);

        tokio::spawn(async move {
            while let Some((message, reply)) = rx.recv().await {
                debug!("Control message: {:?}", message);
                let affected = host.apply(message).await;
                let _ = reply.send(affected);
            }
            debug!("Control channel closed");
        });

        ControlSender { tx }
    }
}

/// Sending side of a host's control channel.
#[derive(Clone)]
pub struct ControlSender {
    tx: mpsc::Sender<(ControlMessage, oneshot::Sender<usize>)>,
}

impl ControlSender {
    /// Deliver a message and wait until the host applied it.
    ///
    /// Returns the number of routers activated or clients claimed.
    pub async fn send(&self, message: ControlMessage) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((message, reply_tx))
            .await
            .map_err(|_| Error::Network("Router control loop has stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Network("Router control loop dropped the reply".to_string()))
    }
}
