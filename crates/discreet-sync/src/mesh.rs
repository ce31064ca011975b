//! # Peer Mesh
//!
//! Direct terminal-to-terminal replication of full inventory snapshots.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Unstarted ──► Registering{1} ──collision──► Registering{2} ──► ...     │
//! │                     │                              │                    │
//! │                     └──────────claimed─────────────┘                    │
//! │                                  ▼                                      │
//! │                            Ready(peer id) ───disconnect───► Stopped     │
//! │                                                                         │
//! │  attempts exhausted ──► RegistrationFailed                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Link Handshake
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   A (dials)                                        B (accepts)          │
//! │     │ resolve(B) via directory                       │                  │
//! │     │──── GET /peer?from=A (upgrade) ───────────────►│                  │
//! │     │                   link Open on both sides      │                  │
//! │     │──── INVENTORY_UPDATE (if A non-empty) ────────►│ replace          │
//! │     │──── REQUEST_SYNC ─────────────────────────────►│                  │
//! │     │◄─── INVENTORY_UPDATE (if B non-empty) ─────────│                  │
//! │     │◄─── REQUEST_SYNC ──────────────────────────────│                  │
//! │     │◄─── INVENTORY_UPDATE (answer to A's request) ──│                  │
//! │     │──── INVENTORY_UPDATE (answer to B's request) ─►│                  │
//! │                                                                         │
//! │   Every received snapshot replaces the local one. Each side ends with   │
//! │   the last snapshot it received.                                        │
//! │                                                                         │
//! │   The snapshot goes out before the request, so the answer to a          │
//! │   request is computed after the requester's own snapshot was applied.  │
//! │   An empty side therefore never wipes a non-empty one.                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Relay
//! With `relay` on, a received snapshot that changed local state is
//! forwarded to every other open link, so a star (or any tree) of terminals
//! converges through its hub. A snapshot that changes nothing is never
//! forwarded, which is what ends the echo: the spoke that receives its own
//! state back applies it as a no-op. A snapshot that returns to an earlier
//! value is a real change and is relayed like any other.
//!
//! Relay assumes the links form a tree. In a cycle, two concurrent writers
//! can keep overwriting each other around the loop.
//!
//! Concurrent `connect` calls for the same peer share one dial.
//!
//! All link state is owned by a single supervisor task. Handles talk to it
//! over a command channel.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use discreet_core::{InventoryStore, Snapshot};

use crate::directory::PeerDirectory;
use crate::error::{SyncError, SyncResult};
use crate::identity::PeerId;
use crate::link::{run_link, LinkDirection, LinkEvent, LinkId};
use crate::protocol::{SyncMessage, MAX_FRAME_BYTES};

/// Buffered mesh events before the supervisor waits for the consumer.
const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Settings for one mesh endpoint.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Generated identifiers look like `<prefix>-NNNN`.
    pub id_prefix: String,
    /// Tried first, before any generated identifier.
    pub preferred_id: Option<String>,
    pub bind_addr: String,
    /// 0 picks a free port.
    pub port: u16,
    /// Host other terminals should dial. Must be an IP address.
    pub advertise_host: String,
    pub connect_timeout: Duration,
    pub max_registration_attempts: u32,
    pub relay: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            id_prefix: "discreet".to_string(),
            preferred_id: None,
            bind_addr: "0.0.0.0".to_string(),
            port: 0,
            advertise_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_registration_attempts: 8,
            relay: true,
        }
    }
}

impl MeshConfig {
    /// Loopback-only endpoint, handy for tests and single-host demos.
    pub fn loopback(id_prefix: &str) -> Self {
        MeshConfig {
            id_prefix: id_prefix.to_string(),
            bind_addr: "127.0.0.1".to_string(),
            ..Default::default()
        }
    }

    pub fn with_preferred_id(mut self, id: impl Into<String>) -> Self {
        self.preferred_id = Some(id.into());
        self
    }
}

// =============================================================================
// State & Events
// =============================================================================

/// Registration state of the local endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshState {
    Unstarted,
    Registering { attempt: u32 },
    Ready(PeerId),
    RegistrationFailed,
    Stopped,
}

/// Notifications from the mesh to its owner.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// Emitted exactly once, when an identifier has been claimed.
    Ready(PeerId),
    /// A candidate identifier was taken; another one is being tried.
    RegistrationRetry { rejected: PeerId, attempt: u32 },
    LinkOpened {
        peer: PeerId,
        direction: LinkDirection,
    },
    LinkClosed {
        peer: PeerId,
        reason: Option<String>,
    },
    /// A peer sent a snapshot. It has already replaced the local one.
    SnapshotReceived {
        from: PeerId,
        snapshot: Snapshot,
        changed: bool,
    },
    /// `connected` is true while at least one link is open.
    ConnectionChanged { connected: bool, open_links: usize },
}

/// Point-in-time view of the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeshStatus {
    pub local_id: PeerId,
    pub connected: bool,
    pub peers: Vec<PeerId>,
}

enum MeshCommand {
    Connect {
        target: PeerId,
        reply: oneshot::Sender<SyncResult<PeerId>>,
    },
    Broadcast(Snapshot),
    Status(oneshot::Sender<MeshStatus>),
    Disconnect(oneshot::Sender<()>),
}

// =============================================================================
// Handle
// =============================================================================

/// Control handle for a running mesh endpoint.
#[derive(Clone)]
pub struct MeshHandle {
    local_id: PeerId,
    local_addr: SocketAddr,
    commands: mpsc::Sender<MeshCommand>,
    state: watch::Receiver<MeshState>,
}

impl std::fmt::Debug for MeshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshHandle")
            .field("local_id", &self.local_id)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MeshHandle {
    /// The identifier other terminals use to reach this one.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> MeshState {
        self.state.borrow().clone()
    }

    /// Opens a link to `target` and completes once the link is open and the
    /// handshake has been sent.
    ///
    /// Fails with `ConnectionFailed` for a malformed or unknown identifier,
    /// the local identifier, or when the peer does not answer within the
    /// connect timeout.
    pub async fn connect(&self, target: &str) -> SyncResult<PeerId> {
        let target =
            PeerId::parse(target).map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(MeshCommand::Connect { target, reply })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;

        rx.await.map_err(|_| {
            SyncError::ConnectionFailed("mesh stopped before the link opened".into())
        })?
    }

    /// Sends `snapshot` to every open link. Succeeds with zero links.
    pub async fn broadcast_update(&self, snapshot: Snapshot) -> SyncResult<()> {
        self.commands
            .send(MeshCommand::Broadcast(snapshot))
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    pub async fn status(&self) -> SyncResult<MeshStatus> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(MeshCommand::Status(reply))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await
            .map_err(|_| SyncError::ChannelError("mesh status reply dropped".into()))
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await.map(|s| s.connected).unwrap_or(false)
    }

    /// Closes every link and releases the identifier. No mesh event is
    /// produced after this returns.
    pub async fn disconnect(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(MeshCommand::Disconnect(reply))
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

// =============================================================================
// Startup
// =============================================================================

/// Entry point for starting a mesh endpoint.
pub struct PeerMesh;

impl PeerMesh {
    /// Binds the link listener, registers an identifier and starts the
    /// supervisor.
    ///
    /// Returns once registration has finished. The event receiver already
    /// holds the `Ready` event (and any retries before it).
    pub async fn start(
        config: MeshConfig,
        directory: Arc<dyn PeerDirectory>,
        store: Arc<InventoryStore>,
    ) -> SyncResult<(MeshHandle, mpsc::Receiver<MeshEvent>)> {
        if config.max_registration_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_registration_attempts must be at least 1".into(),
            ));
        }
        let advertise_ip: IpAddr = config.advertise_host.parse().map_err(|_| {
            SyncError::InvalidConfig(format!(
                "advertise_host must be an IP address: {}",
                config.advertise_host
            ))
        })?;

        let (state_tx, state_rx) = watch::channel(MeshState::Unstarted);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        let bind = format!("{}:{}", config.bind_addr, config.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", bind, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(format!("Listener has no address: {e}")))?;
        let advertised = SocketAddr::new(advertise_ip, local_addr.port());

        let local_id = register(&config, directory.as_ref(), advertised, &state_tx, &events_tx).await?;

        let (link_tx, link_rx) = mpsc::channel(EVENT_CAPACITY);
        let (server_stop, server_stopped) = oneshot::channel::<()>();

        let app = Router::new()
            .route("/peer", get(peer_handler))
            .route("/health", get(|| async { "OK" }))
            .with_state(Arc::new(ListenerState {
                local_id: local_id.clone(),
                links: link_tx.clone(),
            }));

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_stopped.await;
                })
                .await
                .ok();
        });

        info!(peer = %local_id, addr = %advertised, "Peer mesh ready");

        let (commands_tx, commands_rx) = mpsc::channel(64);

        let supervisor = Supervisor {
            local_id: local_id.clone(),
            config,
            store,
            directory,
            links: HashMap::new(),
            pending: HashMap::new(),
            link_tx,
            link_rx,
            commands: commands_rx,
            events: events_tx,
            state: state_tx,
            server_stop: Some(server_stop),
        };
        tokio::spawn(supervisor.run());

        Ok((
            MeshHandle {
                local_id,
                local_addr: advertised,
                commands: commands_tx,
                state: state_rx,
            },
            events_rx,
        ))
    }
}

/// Claims an identifier, retrying with fresh ones on collision.
async fn register(
    config: &MeshConfig,
    directory: &dyn PeerDirectory,
    addr: SocketAddr,
    state: &watch::Sender<MeshState>,
    events: &mpsc::Sender<MeshEvent>,
) -> SyncResult<PeerId> {
    for attempt in 1..=config.max_registration_attempts {
        let candidate = match (&config.preferred_id, attempt) {
            (Some(preferred), 1) => PeerId::parse(preferred)?,
            _ => PeerId::generate(&config.id_prefix),
        };

        state.send_replace(MeshState::Registering { attempt });
        debug!(peer = %candidate, attempt, "Claiming peer identifier");

        match directory.claim(&candidate, addr).await {
            Ok(()) => {
                state.send_replace(MeshState::Ready(candidate.clone()));
                let _ = events.send(MeshEvent::Ready(candidate.clone())).await;
                return Ok(candidate);
            }
            Err(SyncError::IdentifierCollision(_)) => {
                warn!(peer = %candidate, attempt, "Peer identifier taken, trying another");
                let _ = events
                    .send(MeshEvent::RegistrationRetry {
                        rejected: candidate,
                        attempt,
                    })
                    .await;
            }
            Err(e) => {
                error!(error = %e, "Peer directory unavailable");
                state.send_replace(MeshState::RegistrationFailed);
                return Err(e);
            }
        }
    }

    state.send_replace(MeshState::RegistrationFailed);
    Err(SyncError::RegistrationFailed {
        attempts: config.max_registration_attempts,
    })
}

// =============================================================================
// Link Listener
// =============================================================================

struct ListenerState {
    local_id: PeerId,
    links: mpsc::Sender<LinkEvent>,
}

#[derive(Debug, Deserialize)]
struct PeerQuery {
    from: String,
}

async fn peer_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<PeerQuery>,
    State(state): State<Arc<ListenerState>>,
) -> Response {
    let peer = match PeerId::parse(&query.from) {
        Ok(peer) => peer,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    if peer == state.local_id {
        return (StatusCode::CONFLICT, "cannot link to self").into_response();
    }

    debug!(peer = %peer, "Accepting peer link");
    let links = state.links.clone();
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| run_link(socket, peer, LinkDirection::Incoming, links))
        .into_response()
}

// =============================================================================
// Supervisor
// =============================================================================

struct Link {
    peer: PeerId,
    /// `None` once the link was cut for falling behind. It stays listed
    /// until the link task reports it closed.
    outbound: Option<mpsc::Sender<SyncMessage>>,
}

type ConnectReply = oneshot::Sender<SyncResult<PeerId>>;

struct Supervisor {
    local_id: PeerId,
    config: MeshConfig,
    store: Arc<InventoryStore>,
    directory: Arc<dyn PeerDirectory>,
    links: HashMap<LinkId, Link>,
    /// Callers waiting on a dial that is still in flight, by target.
    pending: HashMap<PeerId, Vec<ConnectReply>>,
    link_tx: mpsc::Sender<LinkEvent>,
    link_rx: mpsc::Receiver<LinkEvent>,
    commands: mpsc::Receiver<MeshCommand>,
    events: mpsc::Sender<MeshEvent>,
    state: watch::Sender<MeshState>,
    server_stop: Option<oneshot::Sender<()>>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.teardown().await;
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Some(event) = self.link_rx.recv() => self.handle_link_event(event).await,
            }
        }
        debug!(peer = %self.local_id, "Mesh supervisor stopped");
    }

    async fn handle_command(&mut self, command: MeshCommand) -> ControlFlow<()> {
        match command {
            MeshCommand::Connect { target, reply } => self.connect(target, reply),
            MeshCommand::Broadcast(snapshot) => {
                let links: Vec<LinkId> = self.links.keys().copied().collect();
                debug!(links = links.len(), products = snapshot.len(), "Broadcasting snapshot");
                for link in links {
                    self.send(link, SyncMessage::InventorySnapshot(snapshot.clone()));
                }
            }
            MeshCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            MeshCommand::Disconnect(reply) => {
                self.teardown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn connect(&mut self, target: PeerId, reply: ConnectReply) {
        if target == self.local_id {
            let _ = reply.send(Err(SyncError::ConnectionFailed(
                "cannot connect to own identifier".into(),
            )));
            return;
        }
        if self.links.values().any(|l| l.peer == target) {
            let _ = reply.send(Ok(target));
            return;
        }
        if let Some(waiting) = self.pending.get_mut(&target) {
            debug!(peer = %target, "Dial already in flight, waiting on it");
            waiting.push(reply);
            return;
        }

        self.pending.insert(target.clone(), vec![reply]);
        tokio::spawn(dial(
            target,
            self.local_id.clone(),
            self.directory.clone(),
            self.config.connect_timeout,
            self.link_tx.clone(),
        ));
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened {
                link,
                peer,
                direction,
                outbound,
            } => {
                info!(peer = %peer, ?direction, "Peer link open");
                self.links.insert(
                    link,
                    Link {
                        peer: peer.clone(),
                        outbound: Some(outbound),
                    },
                );

                let current = self.store.current();
                if !current.is_empty() {
                    self.send(link, SyncMessage::InventorySnapshot(current));
                }
                self.send(link, SyncMessage::SyncRequest);

                for waiter in self.pending.remove(&peer).unwrap_or_default() {
                    let _ = waiter.send(Ok(peer.clone()));
                }
                self.emit(MeshEvent::LinkOpened { peer, direction }).await;
                self.emit_connection().await;
            }
            LinkEvent::DialFailed { peer, reason } => {
                for waiter in self.pending.remove(&peer).unwrap_or_default() {
                    let _ = waiter.send(Err(SyncError::ConnectionFailed(reason.clone())));
                }
            }
            LinkEvent::Received { link, message } => self.handle_message(link, message).await,
            LinkEvent::Closed { link, reason } => {
                if let Some(closed) = self.links.remove(&link) {
                    info!(peer = %closed.peer, ?reason, "Peer link closed");
                    self.emit(MeshEvent::LinkClosed {
                        peer: closed.peer,
                        reason,
                    })
                    .await;
                    self.emit_connection().await;
                }
            }
        }
    }

    async fn handle_message(&mut self, link: LinkId, message: SyncMessage) {
        let Some(from) = self.links.get(&link).map(|l| l.peer.clone()) else {
            return;
        };

        match message {
            SyncMessage::SyncRequest => {
                debug!(peer = %from, "Answering sync request");
                self.send(link, SyncMessage::InventorySnapshot(self.store.current()));
            }
            SyncMessage::InventorySnapshot(snapshot) => {
                let changed = self.store.replace(snapshot.clone());
                debug!(peer = %from, products = snapshot.len(), changed, "Applied peer snapshot");

                if changed && self.config.relay {
                    let others: Vec<LinkId> =
                        self.links.keys().copied().filter(|l| *l != link).collect();
                    for other in others {
                        self.send(other, SyncMessage::InventorySnapshot(snapshot.clone()));
                    }
                }

                self.emit(MeshEvent::SnapshotReceived {
                    from,
                    snapshot,
                    changed,
                })
                .await;
            }
        }
    }

    /// Queues a message on one link. A link that cannot keep up is cut.
    fn send(&mut self, link: LinkId, message: SyncMessage) {
        let Some(entry) = self.links.get_mut(&link) else {
            return;
        };
        let Some(outbound) = &entry.outbound else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = outbound.try_send(message) {
            warn!(peer = %entry.peer, "Peer link not keeping up, closing it");
            entry.outbound = None;
        }
    }

    fn status(&self) -> MeshStatus {
        let mut peers: Vec<PeerId> = self.links.values().map(|l| l.peer.clone()).collect();
        peers.sort();
        peers.dedup();
        MeshStatus {
            local_id: self.local_id.clone(),
            connected: !self.links.is_empty(),
            peers,
        }
    }

    async fn emit(&self, event: MeshEvent) {
        let _ = self.events.send(event).await;
    }

    async fn emit_connection(&self) {
        self.emit(MeshEvent::ConnectionChanged {
            connected: !self.links.is_empty(),
            open_links: self.links.len(),
        })
        .await;
    }

    async fn teardown(&mut self) {
        info!(peer = %self.local_id, links = self.links.len(), "Disconnecting peer mesh");

        self.commands.close();
        // Dropping the outbound senders makes every link send Close.
        self.links.clear();
        self.pending.clear();

        if let Some(stop) = self.server_stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.directory.release(&self.local_id).await {
            warn!(peer = %self.local_id, error = %e, "Failed to release peer identifier");
        }
        self.state.send_replace(MeshState::Stopped);
    }
}

/// Resolves and dials one peer, then runs the link.
///
/// The outcome reaches the supervisor as `Opened` or `DialFailed`.
async fn dial(
    target: PeerId,
    local_id: PeerId,
    directory: Arc<dyn PeerDirectory>,
    connect_timeout: Duration,
    links: mpsc::Sender<LinkEvent>,
) {
    let attempt = async {
        let addr = directory.resolve(&target).await.map_err(|e| match e {
            SyncError::PeerNotFound(id) => {
                SyncError::ConnectionFailed(format!("peer {id} is not registered"))
            }
            other => SyncError::ConnectionFailed(other.to_string()),
        })?;

        let url = format!("ws://{}/peer?from={}", addr, local_id);
        debug!(peer = %target, url = %url, "Dialing peer");

        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("{target}: {e}")))?;
        Ok::<_, SyncError>(socket)
    };

    let reason = match timeout(connect_timeout, attempt).await {
        Ok(Ok(socket)) => {
            run_link(socket, target, LinkDirection::Outgoing, links).await;
            return;
        }
        Ok(Err(SyncError::ConnectionFailed(reason))) => reason,
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!(
            "{target} did not answer within {}s",
            connect_timeout.as_secs()
        ),
    };

    warn!(peer = %target, reason = %reason, "Peer connection failed");
    let _ = links.send(LinkEvent::DialFailed { peer: target, reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use discreet_core::seed_snapshot;

    async fn start(directory: &MemoryDirectory, prefix: &str) -> (MeshHandle, mpsc::Receiver<MeshEvent>) {
        PeerMesh::start(
            MeshConfig::loopback(prefix),
            Arc::new(directory.clone()),
            Arc::new(InventoryStore::new(seed_snapshot())),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_ready_after_start() {
        let directory = MemoryDirectory::new();
        let (mesh, mut events) = start(&directory, "dsc").await;

        assert_eq!(mesh.state(), MeshState::Ready(mesh.local_id().clone()));
        assert!(matches!(events.recv().await, Some(MeshEvent::Ready(id)) if &id == mesh.local_id()));
        assert_eq!(directory.resolve(mesh.local_id()).await.unwrap(), mesh.local_addr());
    }

    #[tokio::test]
    async fn test_connect_to_self_is_rejected() {
        let directory = MemoryDirectory::new();
        let (mesh, _events) = start(&directory, "dsc").await;

        let err = mesh.connect(mesh.local_id().as_str()).await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_connect_to_unknown_or_malformed_peer_fails() {
        let directory = MemoryDirectory::new();
        let (mesh, _events) = start(&directory, "dsc").await;

        let unknown = mesh.connect("dsc-0000").await.unwrap_err();
        assert!(matches!(unknown, SyncError::ConnectionFailed(_)));

        let malformed = mesh.connect("not a code").await.unwrap_err();
        assert!(matches!(malformed, SyncError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_registration_gives_up_when_every_id_is_taken() {
        let directory = MemoryDirectory::new();
        let addr = SocketAddr::from(([127, 0, 0, 1], 1));
        for n in 1000..=9999 {
            let id = PeerId::parse(&format!("dsc-{n}")).unwrap();
            directory.claim(&id, addr).await.unwrap();
        }

        let mut config = MeshConfig::loopback("dsc");
        config.max_registration_attempts = 3;

        let result = PeerMesh::start(
            config,
            Arc::new(directory),
            Arc::new(InventoryStore::default()),
        )
        .await;
        assert!(matches!(result, Err(SyncError::RegistrationFailed { attempts: 3 })));
    }

    #[tokio::test]
    async fn test_disconnect_releases_identifier() {
        let directory = MemoryDirectory::new();
        let (mesh, _events) = start(&directory, "dsc").await;

        mesh.disconnect().await.unwrap();

        assert_eq!(mesh.state(), MeshState::Stopped);
        assert!(directory.is_empty().await);
        assert!(!mesh.is_connected().await);
        assert!(matches!(
            mesh.broadcast_update(Snapshot::empty()).await,
            Err(SyncError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_link() {
        let directory = MemoryDirectory::new();
        let (a, mut a_events) = start(&directory, "dsc").await;
        let (b, _b_events) = start(&directory, "dsc").await;

        let target = b.local_id().as_str();
        let (first, second) = tokio::join!(a.connect(target), a.connect(target));
        assert_eq!(&first.unwrap(), b.local_id());
        assert_eq!(&second.unwrap(), b.local_id());

        // Give a second dial, if any, time to open its link.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut opened = 0;
        let mut open_links = 0;
        while let Ok(event) = a_events.try_recv() {
            match event {
                MeshEvent::LinkOpened { .. } => opened += 1,
                MeshEvent::ConnectionChanged { open_links: n, .. } => open_links = n,
                _ => {}
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(open_links, 1);
        assert_eq!(a.status().await.unwrap().peers, vec![b.local_id().clone()]);
    }

    #[tokio::test]
    async fn test_concurrent_connects_to_unknown_peer_all_fail() {
        let directory = MemoryDirectory::new();
        let (mesh, _events) = start(&directory, "dsc").await;

        let (first, second) = tokio::join!(mesh.connect("dsc-0000"), mesh.connect("dsc-0000"));
        assert!(matches!(first, Err(SyncError::ConnectionFailed(_))));
        assert!(matches!(second, Err(SyncError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_links_is_fine() {
        let directory = MemoryDirectory::new();
        let (mesh, _events) = start(&directory, "dsc").await;

        mesh.broadcast_update(seed_snapshot()).await.unwrap();
        let status = mesh.status().await.unwrap();
        assert!(!status.connected);
        assert!(status.peers.is_empty());
    }
}
