//! # Local Tab Channel
//!
//! Propagates snapshots between UI instances ("tabs") running in the same
//! process, over a named in-process channel.
//!
//! ## Fan-out
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │              LocalBus (one per process, passed explicitly)              │
//! │                          │                                              │
//! │        "discreet_local_sync" ──► broadcast::Sender<Post>                │
//! │             ▲        │         │          │                             │
//! │    broadcast│        ▼         ▼          ▼                             │
//! │          Tab A     Tab A     Tab B      Tab C                           │
//! │                   (skipped: own post)                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A channel opened with [`LocalTabChannel::unavailable`], or subscribed
//! outside a Tokio runtime, turns every operation into a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use discreet_core::Snapshot;

use crate::protocol::LocalEnvelope;
use crate::subscription::{Gate, Subscription};

/// Default channel name shared by every tab of one install.
pub const DEFAULT_CHANNEL_NAME: &str = "discreet_local_sync";

/// Buffered posts per channel before slow tabs start lagging.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Post {
    sender: Uuid,
    envelope: LocalEnvelope,
}

// =============================================================================
// Bus
// =============================================================================

/// Registry of named channels for one process.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Post>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh endpoint on the named channel.
    pub fn open(&self, name: &str) -> LocalTabChannel {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();

        LocalTabChannel {
            name: name.to_string(),
            endpoint: Uuid::new_v4(),
            sender: Some(sender),
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// One tab's endpoint on a named channel.
#[derive(Debug, Clone)]
pub struct LocalTabChannel {
    name: String,
    endpoint: Uuid,
    sender: Option<broadcast::Sender<Post>>,
}

impl LocalTabChannel {
    /// An endpoint for an environment without a local channel.
    pub fn unavailable(name: &str) -> Self {
        LocalTabChannel {
            name: name.to_string(),
            endpoint: Uuid::new_v4(),
            sender: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_available(&self) -> bool {
        self.sender.is_some()
    }

    /// Posts `snapshot` to every other endpoint on the channel.
    ///
    /// Fire-and-forget: no delivery confirmation, no error when nobody
    /// listens.
    pub fn broadcast(&self, snapshot: &Snapshot) {
        let Some(sender) = &self.sender else {
            return;
        };

        let post = Post {
            sender: self.endpoint,
            envelope: LocalEnvelope::inventory_update(snapshot.clone()),
        };

        match sender.send(post) {
            Ok(receivers) => {
                debug!(channel = %self.name, receivers, products = snapshot.len(), "Posted to local tabs")
            }
            Err(_) => debug!(channel = %self.name, "No local tabs listening"),
        }
    }

    /// Invokes `callback` with every snapshot another endpoint posts.
    ///
    /// Posts are delivered in order. Own posts and unknown message kinds are
    /// ignored.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Snapshot) + Send + Sync + 'static,
    {
        let Some(sender) = &self.sender else {
            return Subscription::inert();
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(channel = %self.name, "No async runtime, local tab sync disabled");
                return Subscription::inert();
            }
        };

        let mut posts = sender.subscribe();
        let gate = Gate::new();
        let task_gate = gate.clone();
        let endpoint = self.endpoint;
        let name = self.name.clone();

        let task = runtime.spawn(async move {
            loop {
                match posts.recv().await {
                    Ok(post) => {
                        if post.sender == endpoint || !post.envelope.is_inventory_update() {
                            continue;
                        }
                        if task_gate.run(|| callback(post.envelope.payload)).is_none() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(channel = %name, skipped = n, "Local tab listener lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription::new(gate, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discreet_core::{seed_snapshot, InventoryStore};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn collector() -> (impl Fn(Snapshot) + Send + Sync + 'static, mpsc::UnboundedReceiver<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |s| drop(tx.send(s)), rx)
    }

    #[tokio::test]
    async fn test_sibling_receives_but_sender_does_not() {
        let bus = LocalBus::new();
        let a = bus.open(DEFAULT_CHANNEL_NAME);
        let b = bus.open(DEFAULT_CHANNEL_NAME);

        let (on_a, mut got_a) = collector();
        let (on_b, mut got_b) = collector();
        let _sub_a = a.subscribe(on_a);
        let _sub_b = b.subscribe(on_b);

        a.broadcast(&seed_snapshot());

        let received = tokio::time::timeout(Duration::from_secs(1), got_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, seed_snapshot());

        let echoed = tokio::time::timeout(Duration::from_millis(100), got_a.recv()).await;
        assert!(echoed.is_err(), "own post must not be delivered");
    }

    #[tokio::test]
    async fn test_repeated_post_leaves_same_state() {
        let bus = LocalBus::new();
        let a = bus.open(DEFAULT_CHANNEL_NAME);
        let b = bus.open(DEFAULT_CHANNEL_NAME);
        let store = Arc::new(InventoryStore::new(Snapshot::empty()));

        let (on_b, mut got_b) = collector();
        let _sub = b.subscribe(on_b);

        let next = Snapshot::new(vec![seed_snapshot()[0].with_stock(42)]);
        a.broadcast(&next);
        a.broadcast(&next);

        let mut changes = Vec::new();
        while let Ok(Some(received)) = tokio::time::timeout(Duration::from_millis(200), got_b.recv()).await {
            changes.push(store.replace(received));
        }
        assert_eq!(changes, vec![true, false]);
        assert_eq!(store.current(), next);
    }

    #[tokio::test]
    async fn test_channels_are_isolated_by_name() {
        let bus = LocalBus::new();
        let a = bus.open("one");
        let b = bus.open("two");

        let (on_b, mut got_b) = collector();
        let _sub = b.subscribe(on_b);
        a.broadcast(&seed_snapshot());

        let nothing = tokio::time::timeout(Duration::from_millis(100), got_b.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_no_delivery_after_unsubscribe() {
        let bus = LocalBus::new();
        let a = bus.open(DEFAULT_CHANNEL_NAME);
        let b = bus.open(DEFAULT_CHANNEL_NAME);

        let (on_b, mut got_b) = collector();
        let sub = b.subscribe(on_b);
        sub.unsubscribe();

        a.broadcast(&seed_snapshot());
        let nothing = tokio::time::timeout(Duration::from_millis(100), got_b.recv()).await;
        assert!(matches!(nothing, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_unavailable_channel_is_a_no_op() {
        let channel = LocalTabChannel::unavailable(DEFAULT_CHANNEL_NAME);
        channel.broadcast(&seed_snapshot());

        let sub = channel.subscribe(|_| panic!("never called"));
        assert!(!sub.is_active());
        assert!(!channel.is_available());
    }

    #[test]
    fn test_subscribe_without_runtime_is_a_no_op() {
        let bus = LocalBus::new();
        let channel = bus.open(DEFAULT_CHANNEL_NAME);

        let sub = channel.subscribe(|_| {});
        assert!(!sub.is_active());
        channel.broadcast(&seed_snapshot());
    }
}
