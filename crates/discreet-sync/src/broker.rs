//! # Rendezvous Broker
//!
//! Tiny WebSocket service that lets terminals find each other by the
//! identifier shown on screen. It never sees inventory: peers dial each
//! other directly once an identifier is resolved.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  terminal ──── GET /broker (upgrade) ───► broker                        │
//! │                                                                         │
//! │  Claim   { dsc-4821, 10.0.0.7:53011 } ──► Claimed   (held by session)   │
//! │  Claim   { dsc-4821, ... } (2nd session) ► Taken                        │
//! │  Resolve { dsc-4821 }                 ──► Resolved  { 10.0.0.7:53011 }  │
//! │  Release { dsc-4821 }                 ──► Released                      │
//! │                                                                         │
//! │  socket closes ──► every claim held by that session is dropped          │
//! │  shutdown      ──► every open session is closed                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::identity::PeerId;
use crate::protocol::{BrokerMessage, MAX_FRAME_BYTES};

/// Default broker port.
pub const DEFAULT_BROKER_PORT: u16 = 9470;

// =============================================================================
// Configuration
// =============================================================================

/// Where the broker listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub bind_addr: String,
    /// 0 picks a free port.
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_BROKER_PORT,
        }
    }
}

impl BrokerConfig {
    /// Defaults overridden by `BROKER_BIND` and `BROKER_PORT`.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = BrokerConfig::default();

        if let Ok(bind) = std::env::var("BROKER_BIND") {
            config.bind_addr = bind;
        }
        if let Ok(port) = std::env::var("BROKER_PORT") {
            config.port = port
                .parse()
                .map_err(|_| SyncError::InvalidConfig(format!("BROKER_PORT is not a port: {port}")))?;
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Broker State
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Claim {
    addr: SocketAddr,
    session: Uuid,
}

#[derive(Debug)]
struct BrokerState {
    claims: RwLock<HashMap<PeerId, Claim>>,
    /// Flips to true once when the broker shuts down.
    closing: watch::Sender<bool>,
}

impl Default for BrokerState {
    fn default() -> Self {
        BrokerState {
            claims: RwLock::new(HashMap::new()),
            closing: watch::channel(false).0,
        }
    }
}

impl BrokerState {
    async fn handle(&self, session: Uuid, request: BrokerMessage) -> BrokerMessage {
        match request {
            BrokerMessage::Claim { id, addr } => {
                let mut claims = self.claims.write().await;
                let taken = claims.get(&id).is_some_and(|c| c.session != session);
                if taken {
                    debug!(peer = %id, "Identifier already held");
                    return BrokerMessage::Taken { id };
                }
                claims.insert(id.clone(), Claim { addr, session });
                info!(peer = %id, addr = %addr, "Identifier claimed");
                BrokerMessage::Claimed { id }
            }
            BrokerMessage::Resolve { id } => match self.claims.read().await.get(&id) {
                Some(claim) => BrokerMessage::Resolved {
                    id,
                    addr: claim.addr,
                },
                None => BrokerMessage::Unknown { id },
            },
            BrokerMessage::Release { id } => {
                let mut claims = self.claims.write().await;
                if claims.get(&id).is_some_and(|c| c.session == session) {
                    claims.remove(&id);
                    info!(peer = %id, "Identifier released");
                }
                BrokerMessage::Released { id }
            }
            other => BrokerMessage::Error {
                message: format!("{} is not a request", other.type_name()),
            },
        }
    }

    async fn drop_session(&self, session: Uuid) {
        let mut claims = self.claims.write().await;
        let before = claims.len();
        claims.retain(|_, claim| claim.session != session);
        let dropped = before - claims.len();
        if dropped > 0 {
            info!(dropped, "Released identifiers of closed session");
        }
    }
}

// =============================================================================
// Broker Server
// =============================================================================

/// The rendezvous service.
pub struct BrokerServer {
    config: BrokerConfig,
    state: Arc<BrokerState>,
}

/// Handle for a running broker.
#[derive(Clone)]
pub struct BrokerHandle {
    local_addr: SocketAddr,
    state: Arc<BrokerState>,
    shutdown_tx: mpsc::Sender<()>,
}

impl BrokerHandle {
    /// Address the broker actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL terminals should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}/broker", self.local_addr)
    }

    /// Number of identifiers currently held.
    pub async fn claim_count(&self) -> usize {
        self.state.claims.read().await.len()
    }

    /// Stops accepting and closes every open session.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.state.closing.send_replace(true);
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Broker shutdown channel closed".into()))
    }
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> Self {
        BrokerServer {
            config,
            state: Arc::new(BrokerState::default()),
        }
    }

    /// Binds and starts serving. Returns once the listener is bound.
    pub async fn start(self) -> SyncResult<BrokerHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let app = Router::new()
            .route("/broker", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone());

        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(format!("Listener has no address: {e}")))?;

        info!(addr = %local_addr, "Rendezvous broker started");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Rendezvous broker shutting down");
            })
            .await
            .ok();
        });

        Ok(BrokerHandle {
            local_addr,
            state: self.state,
            shutdown_tx,
        })
    }
}

// =============================================================================
// WebSocket Handler
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BrokerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!(addr = %addr, "Broker session opening");
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<BrokerState>, addr: SocketAddr) {
    let session = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let mut closing = state.closing.subscribe();

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = closing.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };

        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(addr = %addr, error = %e, "Broker session error");
                break;
            }
        };

        let reply = match BrokerMessage::from_json(text.as_str()) {
            Ok(request) => state.handle(session, request).await,
            Err(e) => BrokerMessage::Error {
                message: e.to_string(),
            },
        };

        let json = match reply.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode broker reply");
                break;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }

    state.drop_session(session).await;
    debug!(addr = %addr, "Broker session closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::parse(s).unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_across_sessions() {
        let state = BrokerState::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = state
            .handle(a, BrokerMessage::Claim { id: id("dsc-1234"), addr: addr(1) })
            .await;
        assert!(matches!(first, BrokerMessage::Claimed { .. }));

        let second = state
            .handle(b, BrokerMessage::Claim { id: id("dsc-1234"), addr: addr(2) })
            .await;
        assert!(matches!(second, BrokerMessage::Taken { .. }));

        let resolved = state.handle(b, BrokerMessage::Resolve { id: id("dsc-1234") }).await;
        assert_eq!(
            resolved,
            BrokerMessage::Resolved { id: id("dsc-1234"), addr: addr(1) }
        );
    }

    #[tokio::test]
    async fn test_only_owner_can_release() {
        let state = BrokerState::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        state
            .handle(a, BrokerMessage::Claim { id: id("dsc-1234"), addr: addr(1) })
            .await;
        state.handle(b, BrokerMessage::Release { id: id("dsc-1234") }).await;
        assert_eq!(state.claims.read().await.len(), 1);

        state.handle(a, BrokerMessage::Release { id: id("dsc-1234") }).await;
        assert!(state.claims.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_drops_its_claims() {
        let state = BrokerState::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        state
            .handle(a, BrokerMessage::Claim { id: id("dsc-1111"), addr: addr(1) })
            .await;
        state
            .handle(b, BrokerMessage::Claim { id: id("dsc-2222"), addr: addr(2) })
            .await;

        state.drop_session(a).await;

        let gone = state.handle(b, BrokerMessage::Resolve { id: id("dsc-1111") }).await;
        assert!(matches!(gone, BrokerMessage::Unknown { .. }));
        assert_eq!(state.claims.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replies_are_not_requests() {
        let state = BrokerState::default();
        let reply = state
            .handle(Uuid::new_v4(), BrokerMessage::Released { id: id("dsc-1234") })
            .await;
        assert!(matches!(reply, BrokerMessage::Error { .. }));
    }

    #[test]
    fn test_bind_address() {
        let config = BrokerConfig {
            bind_addr: "127.0.0.1".into(),
            port: 0,
        };
        assert_eq!(config.bind_address(), "127.0.0.1:0");
    }
}
