//! # Peer Directory
//!
//! Maps self-chosen peer identifiers to reachable socket addresses. The mesh
//! claims an identifier on start, resolves the identifier an operator types
//! in, and releases its own identifier on disconnect.
//!
//! ## Implementations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  MemoryDirectory   shared map, one process (tests, single-host demos)   │
//! │                                                                         │
//! │  BrokerDirectory   WebSocket session to a rendezvous broker             │
//! │                    ┌──────────┐  Claim/Resolve/Release  ┌──────────┐   │
//! │                    │ terminal │ ──────────────────────► │  broker  │   │
//! │                    └──────────┘ ◄────────────────────── └──────────┘   │
//! │                                  Claimed/Taken/...                      │
//! │                    Claims live as long as the session; after a          │
//! │                    reconnect every held claim is re-sent.               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Keepalive
//! A background task pings the broker every `ping_interval`. A missing pong
//! or a closed socket makes it reconnect and re-claim straight away, so a
//! broker restart does not leave this terminal unresolvable until its next
//! request. The task stops when the directory is dropped.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::identity::PeerId;
use crate::protocol::BrokerMessage;

type BrokerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identifier registry used by the mesh.
#[async_trait]
pub trait PeerDirectory: Send + Sync + 'static {
    /// Registers `id` at `addr`. Fails with `IdentifierCollision` when the
    /// identifier is already held.
    async fn claim(&self, id: &PeerId, addr: SocketAddr) -> SyncResult<()>;

    /// Looks up where `id` can be dialed. Fails with `PeerNotFound`.
    async fn resolve(&self, id: &PeerId) -> SyncResult<SocketAddr>;

    /// Drops a claim. Releasing an unknown identifier is not an error.
    async fn release(&self, id: &PeerId) -> SyncResult<()>;
}

// =============================================================================
// In-Memory Directory
// =============================================================================

/// Directory shared by every clone in one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    entries: Arc<RwLock<HashMap<PeerId, SocketAddr>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PeerDirectory for MemoryDirectory {
    async fn claim(&self, id: &PeerId, addr: SocketAddr) -> SyncResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(id) {
            return Err(SyncError::IdentifierCollision(id.to_string()));
        }
        entries.insert(id.clone(), addr);
        Ok(())
    }

    async fn resolve(&self, id: &PeerId) -> SyncResult<SocketAddr> {
        self.entries
            .read()
            .await
            .get(id)
            .copied()
            .ok_or_else(|| SyncError::PeerNotFound(id.to_string()))
    }

    async fn release(&self, id: &PeerId) -> SyncResult<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }
}

// =============================================================================
// Broker Directory
// =============================================================================

/// Settings for a broker session.
#[derive(Debug, Clone)]
pub struct BrokerDirectoryConfig {
    /// `ws://host:port/broker`
    pub url: String,
    pub connect_timeout: Duration,
    /// Time allowed for one request/reply exchange.
    pub request_timeout: Duration,
    /// Total time spent retrying the initial connection.
    pub max_connect_time: Duration,
    /// How often an idle session is checked.
    pub ping_interval: Duration,
    /// Session is considered lost if no pong arrives within this time.
    pub pong_timeout: Duration,
}

impl BrokerDirectoryConfig {
    pub fn new(url: impl Into<String>) -> Self {
        BrokerDirectoryConfig {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            max_connect_time: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

#[derive(Default)]
struct Session {
    socket: Option<BrokerSocket>,
    claims: HashMap<PeerId, SocketAddr>,
}

/// Directory backed by a rendezvous broker.
pub struct BrokerDirectory {
    config: BrokerDirectoryConfig,
    session: Arc<Mutex<Session>>,
    keepalive: JoinHandle<()>,
}

impl std::fmt::Debug for BrokerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerDirectory")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

impl BrokerDirectory {
    /// Connects to the broker, retrying with exponential backoff.
    pub async fn connect(config: BrokerDirectoryConfig) -> SyncResult<Self> {
        url::Url::parse(&config.url)?;

        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed_time: Some(config.max_connect_time),
            ..Default::default()
        };

        let socket = loop {
            match open_socket(&config).await {
                Ok(socket) => break socket,
                Err(e) => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(url = %config.url, error = %e, delay_ms = delay.as_millis() as u64, "Broker unreachable, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        };

        info!(url = %config.url, "Connected to rendezvous broker");

        let session = Arc::new(Mutex::new(Session {
            socket: Some(socket),
            claims: HashMap::new(),
        }));
        let keepalive = tokio::spawn(keep_alive(Arc::downgrade(&session), config.clone()));

        Ok(BrokerDirectory {
            config,
            session,
            keepalive,
        })
    }

    /// Sends one request and waits for its reply, reconnecting once if the
    /// session was lost.
    async fn request(&self, message: BrokerMessage) -> SyncResult<BrokerMessage> {
        let mut session = self.session.lock().await;

        for attempt in 0..2 {
            if session.socket.is_none() {
                let mut socket = open_socket(&self.config).await?;
                reclaim(&mut socket, &session.claims, self.config.request_timeout).await;
                session.socket = Some(socket);
            }

            let Some(socket) = session.socket.as_mut() else {
                return Err(SyncError::Disconnected);
            };

            match exchange(socket, &message, self.config.request_timeout).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    session.socket = None;
                    if attempt == 0 && e.is_retryable() {
                        warn!(error = %e, request = message.type_name(), "Broker session lost, reconnecting");
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(SyncError::Disconnected)
    }
}

impl Drop for BrokerDirectory {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

#[async_trait]
impl PeerDirectory for BrokerDirectory {
    async fn claim(&self, id: &PeerId, addr: SocketAddr) -> SyncResult<()> {
        let reply = self
            .request(BrokerMessage::Claim {
                id: id.clone(),
                addr,
            })
            .await?;

        match reply {
            BrokerMessage::Claimed { .. } => {
                self.session.lock().await.claims.insert(id.clone(), addr);
                Ok(())
            }
            BrokerMessage::Taken { .. } => Err(SyncError::IdentifierCollision(id.to_string())),
            other => Err(unexpected(other)),
        }
    }

    async fn resolve(&self, id: &PeerId) -> SyncResult<SocketAddr> {
        match self.request(BrokerMessage::Resolve { id: id.clone() }).await? {
            BrokerMessage::Resolved { addr, .. } => Ok(addr),
            BrokerMessage::Unknown { .. } => Err(SyncError::PeerNotFound(id.to_string())),
            other => Err(unexpected(other)),
        }
    }

    async fn release(&self, id: &PeerId) -> SyncResult<()> {
        self.session.lock().await.claims.remove(id);
        match self.request(BrokerMessage::Release { id: id.clone() }).await? {
            BrokerMessage::Released { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: BrokerMessage) -> SyncError {
    match reply {
        BrokerMessage::Error { message } => SyncError::InvalidMessage(message),
        other => SyncError::InvalidMessage(format!("unexpected broker reply {}", other.type_name())),
    }
}

async fn open_socket(config: &BrokerDirectoryConfig) -> SyncResult<BrokerSocket> {
    match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((socket, response))) => {
            debug!(status = ?response.status(), "Broker handshake complete");
            Ok(socket)
        }
        Ok(Err(e)) => Err(SyncError::from(e)),
        Err(_) => Err(SyncError::Timeout(config.connect_timeout.as_secs())),
    }
}

async fn exchange(
    socket: &mut BrokerSocket,
    message: &BrokerMessage,
    limit: Duration,
) -> SyncResult<BrokerMessage> {
    let json = message.to_json()?;

    let round_trip = async {
        if let Err(e) = socket.send(WsMessage::Text(json.into())).await {
            return Err(SyncError::from(e));
        }
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return BrokerMessage::from_json(text.as_str()),
                Some(Ok(WsMessage::Close(_))) | None => return Err(SyncError::Disconnected),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SyncError::from(e)),
            }
        }
    };

    match timeout(limit, round_trip).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit.as_secs())),
    }
}

/// Pings the broker and waits for the pong. Replies that arrive in between
/// are skipped; nothing else is in flight while the session is locked.
async fn ping(socket: &mut BrokerSocket, limit: Duration) -> SyncResult<()> {
    let round_trip = async {
        socket.send(WsMessage::Ping(vec![].into())).await?;
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Pong(_))) => return Ok(()),
                Some(Ok(WsMessage::Close(_))) | None => return Err(SyncError::Disconnected),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SyncError::from(e)),
            }
        }
    };

    match timeout(limit, round_trip).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit.as_secs())),
    }
}

/// Checks the session every `ping_interval` and restores it when lost.
async fn keep_alive(handle: Weak<Mutex<Session>>, config: BrokerDirectoryConfig) {
    let mut ticks = tokio::time::interval(config.ping_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticks.tick().await;

    loop {
        ticks.tick().await;
        let Some(shared) = handle.upgrade() else {
            break;
        };
        let mut session = shared.lock().await;

        if let Some(socket) = session.socket.as_mut() {
            match ping(socket, config.pong_timeout).await {
                Ok(()) => continue,
                Err(e) => {
                    warn!(url = %config.url, error = %e, "Broker session lost, reconnecting");
                    session.socket = None;
                }
            }
        }

        match open_socket(&config).await {
            Ok(mut socket) => {
                reclaim(&mut socket, &session.claims, config.request_timeout).await;
                info!(url = %config.url, claims = session.claims.len(), "Broker session restored");
                session.socket = Some(socket);
            }
            Err(e) => debug!(url = %config.url, error = %e, "Broker still unreachable"),
        }
    }
}

/// Re-sends held claims on a fresh session.
async fn reclaim(socket: &mut BrokerSocket, claims: &HashMap<PeerId, SocketAddr>, limit: Duration) {
    for (id, addr) in claims {
        let claim = BrokerMessage::Claim {
            id: id.clone(),
            addr: *addr,
        };
        match exchange(socket, &claim, limit).await {
            Ok(BrokerMessage::Claimed { .. }) => debug!(peer = %id, "Re-claimed identifier"),
            Ok(reply) => warn!(peer = %id, reply = reply.type_name(), "Identifier lost while reconnecting"),
            Err(e) => warn!(peer = %id, error = %e, "Re-claim failed"),
        }
    }
}
