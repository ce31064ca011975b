//! Per-socket pump for one peer link.
//!
//! The same loop drives accepted sockets (axum) and dialed sockets
//! (tokio-tungstenite). It only moves frames: decisions about what to send
//! and what to do with received snapshots belong to the mesh supervisor.
//!
//! ```text
//!   supervisor ──outbound mpsc──► [ run_link ] ──text frame──► socket
//!   supervisor ◄──LinkEvent────── [ run_link ] ◄─text frame─── socket
//! ```
//!
//! Dropping the outbound sender closes the socket.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::identity::PeerId;
use crate::protocol::SyncMessage;

/// Messages queued per link before the supervisor gives up on it.
pub(crate) const LINK_QUEUE: usize = 64;

pub(crate) type LinkId = Uuid;

/// Which side dialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    Incoming,
    Outgoing,
}

/// What a link reports back to the supervisor.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    Opened {
        link: LinkId,
        peer: PeerId,
        direction: LinkDirection,
        outbound: mpsc::Sender<SyncMessage>,
    },
    /// A dial never produced an open socket.
    DialFailed {
        peer: PeerId,
        reason: String,
    },
    Received {
        link: LinkId,
        message: SyncMessage,
    },
    Closed {
        link: LinkId,
        reason: Option<String>,
    },
}

// =============================================================================
// Frame Adapters
// =============================================================================

pub(crate) enum Inbound {
    Text(String),
    Close,
    Ignore,
}

/// The few things a link needs from a WebSocket message type.
pub(crate) trait WireFrame: Sized + Send + Unpin + 'static {
    fn text(json: String) -> Self;
    fn close() -> Self;
    fn inbound(self) -> Inbound;
}

impl WireFrame for axum::extract::ws::Message {
    fn text(json: String) -> Self {
        axum::extract::ws::Message::Text(json.into())
    }

    fn close() -> Self {
        axum::extract::ws::Message::Close(None)
    }

    fn inbound(self) -> Inbound {
        use axum::extract::ws::Message;
        match self {
            Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Inbound::Text(text),
                Err(_) => Inbound::Ignore,
            },
            Message::Close(_) => Inbound::Close,
            _ => Inbound::Ignore,
        }
    }
}

impl WireFrame for tokio_tungstenite::tungstenite::Message {
    fn text(json: String) -> Self {
        tokio_tungstenite::tungstenite::Message::Text(json.into())
    }

    fn close() -> Self {
        tokio_tungstenite::tungstenite::Message::Close(None)
    }

    fn inbound(self) -> Inbound {
        use tokio_tungstenite::tungstenite::Message;
        match self {
            Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Inbound::Text(text),
                Err(_) => Inbound::Ignore,
            },
            Message::Close(_) => Inbound::Close,
            _ => Inbound::Ignore,
        }
    }
}

// =============================================================================
// Link Loop
// =============================================================================

/// Runs one open link until either side closes it.
pub(crate) async fn run_link<S, F, E, SE>(
    socket: S,
    peer: PeerId,
    direction: LinkDirection,
    events: mpsc::Sender<LinkEvent>,
) where
    S: Stream<Item = Result<F, E>> + Sink<F, Error = SE> + Send + 'static,
    F: WireFrame,
    E: Display + Send,
    SE: Display + Send,
{
    let link = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut queue) = mpsc::channel::<SyncMessage>(LINK_QUEUE);

    let opened = LinkEvent::Opened {
        link,
        peer: peer.clone(),
        direction,
        outbound,
    };
    if events.send(opened).await.is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(message) => {
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => break Some(e.to_string()),
                    };
                    if let Err(e) = sink.send(F::text(json)).await {
                        break Some(e.to_string());
                    }
                }
                None => {
                    let _ = sink.send(F::close()).await;
                    break None;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(frame)) => match frame.inbound() {
                    Inbound::Text(text) => match SyncMessage::from_json(&text) {
                        Ok(message) => {
                            if events.send(LinkEvent::Received { link, message }).await.is_err() {
                                break None;
                            }
                        }
                        Err(e) => warn!(peer = %peer, error = %e, "Dropping malformed peer message"),
                    },
                    Inbound::Close => break None,
                    Inbound::Ignore => {}
                },
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            },
        }
    };

    debug!(peer = %peer, ?direction, ?reason, "Peer link finished");
    let _ = events.send(LinkEvent::Closed { link, reason }).await;
}
