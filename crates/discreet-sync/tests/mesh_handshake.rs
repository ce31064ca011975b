//! Peer mesh handshake and registration over loopback WebSockets.

use std::sync::Arc;
use std::time::Duration;

use discreet_core::{seed_snapshot, InventoryStore, Snapshot};
use discreet_sync::{
    MeshConfig, MeshEvent, MeshHandle, MeshState, MemoryDirectory, PeerDirectory, PeerId,
    PeerMesh,
};
use tokio::sync::mpsc;

struct Node {
    mesh: MeshHandle,
    events: mpsc::Receiver<MeshEvent>,
    store: Arc<InventoryStore>,
}

async fn node(directory: &MemoryDirectory, initial: Snapshot) -> Node {
    let store = Arc::new(InventoryStore::new(initial));
    let (mesh, events) = PeerMesh::start(
        MeshConfig::loopback("dsc"),
        Arc::new(directory.clone()),
        store.clone(),
    )
    .await
    .unwrap();
    Node { mesh, events, store }
}

/// Drains events until the mesh has been quiet for a while and returns the
/// last snapshot received from a peer.
async fn last_received(events: &mut mpsc::Receiver<MeshEvent>) -> Option<Snapshot> {
    let mut last = None;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
        if let MeshEvent::SnapshotReceived { snapshot, .. } = event {
            last = Some(snapshot);
        }
    }
    last
}

fn other_snapshot() -> Snapshot {
    Snapshot::new(vec![seed_snapshot()[0].with_stock(42)])
}

#[tokio::test]
async fn test_empty_terminal_adopts_peer_inventory() {
    let directory = MemoryDirectory::new();
    let mut a = node(&directory, Snapshot::empty()).await;
    let mut b = node(&directory, seed_snapshot()).await;

    let linked = a.mesh.connect(b.mesh.local_id().as_str()).await.unwrap();
    assert_eq!(&linked, b.mesh.local_id());

    last_received(&mut a.events).await;
    last_received(&mut b.events).await;

    assert_eq!(a.store.current(), seed_snapshot());
    assert_eq!(b.store.current(), seed_snapshot());
}

#[tokio::test]
async fn test_empty_terminal_accepting_adopts_peer_inventory() {
    let directory = MemoryDirectory::new();
    let mut a = node(&directory, Snapshot::empty()).await;
    let mut b = node(&directory, seed_snapshot()).await;

    b.mesh.connect(a.mesh.local_id().as_str()).await.unwrap();

    last_received(&mut a.events).await;
    last_received(&mut b.events).await;

    assert_eq!(a.store.current(), seed_snapshot());
    assert_eq!(b.store.current(), seed_snapshot());
}

async fn assert_each_side_keeps_last_received(a_dials: bool) {
    let directory = MemoryDirectory::new();
    let mut a = node(&directory, seed_snapshot()).await;
    let mut b = node(&directory, other_snapshot()).await;

    if a_dials {
        a.mesh.connect(b.mesh.local_id().as_str()).await.unwrap();
    } else {
        b.mesh.connect(a.mesh.local_id().as_str()).await.unwrap();
    }

    let a_last = last_received(&mut a.events).await.expect("a received nothing");
    let b_last = last_received(&mut b.events).await.expect("b received nothing");

    assert_eq!(a.store.current(), a_last);
    assert_eq!(b.store.current(), b_last);
}

#[tokio::test]
async fn test_both_non_empty_dialer_first() {
    assert_each_side_keeps_last_received(true).await;
}

#[tokio::test]
async fn test_both_non_empty_acceptor_first() {
    assert_each_side_keeps_last_received(false).await;
}

#[tokio::test]
async fn test_broadcast_reaches_linked_peer() {
    let directory = MemoryDirectory::new();
    let mut a = node(&directory, seed_snapshot()).await;
    let mut b = node(&directory, seed_snapshot()).await;

    a.mesh.connect(b.mesh.local_id().as_str()).await.unwrap();
    last_received(&mut a.events).await;
    last_received(&mut b.events).await;

    let next = a.store.apply(|_| other_snapshot());
    a.mesh.broadcast_update(next.clone()).await.unwrap();

    assert_eq!(last_received(&mut b.events).await, Some(next.clone()));
    assert_eq!(b.store.current(), next);

    let status = a.mesh.status().await.unwrap();
    assert!(status.connected);
    assert_eq!(status.peers, vec![b.mesh.local_id().clone()]);
}

#[tokio::test]
async fn test_hub_relays_between_spokes() {
    let directory = MemoryDirectory::new();
    let mut hub = node(&directory, seed_snapshot()).await;
    let mut left = node(&directory, seed_snapshot()).await;
    let mut right = node(&directory, seed_snapshot()).await;

    left.mesh.connect(hub.mesh.local_id().as_str()).await.unwrap();
    right.mesh.connect(hub.mesh.local_id().as_str()).await.unwrap();
    last_received(&mut hub.events).await;
    last_received(&mut left.events).await;
    last_received(&mut right.events).await;

    let next = left.store.apply(|_| other_snapshot());
    left.mesh.broadcast_update(next.clone()).await.unwrap();

    assert_eq!(last_received(&mut right.events).await, Some(next.clone()));
    assert_eq!(hub.store.current(), next);
    assert_eq!(right.store.current(), next);
}

/// Left and right spokes linked through a hub, with the handshake traffic
/// already drained.
async fn star(directory: &MemoryDirectory) -> (Node, Node, Node) {
    let mut hub = node(directory, seed_snapshot()).await;
    let mut left = node(directory, seed_snapshot()).await;
    let mut right = node(directory, seed_snapshot()).await;

    left.mesh.connect(hub.mesh.local_id().as_str()).await.unwrap();
    right.mesh.connect(hub.mesh.local_id().as_str()).await.unwrap();
    last_received(&mut hub.events).await;
    last_received(&mut left.events).await;
    last_received(&mut right.events).await;

    (hub, left, right)
}

async fn wait_until_all_hold(nodes: [&Node; 3], expected: &Snapshot) {
    for _ in 0..100 {
        if nodes.iter().all(|n| &n.store.current() == expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let held: Vec<Snapshot> = nodes.iter().map(|n| n.store.current()).collect();
    panic!("mesh did not converge on {expected:?}, holding {held:?}");
}

#[tokio::test]
async fn test_hub_relays_a_value_that_returns() {
    let directory = MemoryDirectory::new();
    let (hub, left, right) = star(&directory).await;

    // Sell down to 42, load back to the seed level, sell down to 42 again.
    for next in [other_snapshot(), seed_snapshot(), other_snapshot()] {
        let applied = left.store.apply(|_| next.clone());
        left.mesh.broadcast_update(applied).await.unwrap();
        wait_until_all_hold([&hub, &left, &right], &next).await;
    }
}

#[tokio::test]
async fn test_same_snapshot_twice_is_applied_once() {
    let directory = MemoryDirectory::new();
    let (mut hub, left, mut right) = star(&directory).await;

    let next = left.store.apply(|_| other_snapshot());
    left.mesh.broadcast_update(next.clone()).await.unwrap();
    left.mesh.broadcast_update(next.clone()).await.unwrap();

    let mut right_received = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(500), right.events.recv()).await {
        if let MeshEvent::SnapshotReceived { snapshot, changed, .. } = event {
            right_received.push((snapshot, changed));
        }
    }
    let mut hub_changes = Vec::new();
    while let Ok(event) = hub.events.try_recv() {
        if let MeshEvent::SnapshotReceived { changed, .. } = event {
            hub_changes.push(changed);
        }
    }

    assert_eq!(hub_changes, vec![true, false]);
    assert_eq!(right_received, vec![(next.clone(), true)]);
    assert_eq!(hub.store.current(), next);
    assert_eq!(right.store.current(), next);
}

#[tokio::test]
async fn test_link_close_updates_connection_status() {
    let directory = MemoryDirectory::new();
    let a = node(&directory, seed_snapshot()).await;
    let mut b = node(&directory, seed_snapshot()).await;

    a.mesh.connect(b.mesh.local_id().as_str()).await.unwrap();
    a.mesh.disconnect().await.unwrap();

    let mut disconnected = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), b.events.recv()).await {
        if let MeshEvent::ConnectionChanged { connected: false, open_links: 0 } = event {
            disconnected = true;
            break;
        }
    }
    assert!(disconnected);
    assert!(!b.mesh.is_connected().await);
}

#[tokio::test]
async fn test_identifier_collision_picks_another() {
    let directory = MemoryDirectory::new();
    let taken = PeerId::parse("dsc-1234").unwrap();
    directory
        .claim(&taken, "127.0.0.1:1".parse().unwrap())
        .await
        .unwrap();

    let (mesh, mut events) = PeerMesh::start(
        MeshConfig::loopback("dsc").with_preferred_id("dsc-1234"),
        Arc::new(directory.clone()),
        Arc::new(InventoryStore::default()),
    )
    .await
    .unwrap();

    assert_ne!(mesh.local_id(), &taken);
    assert_eq!(mesh.state(), MeshState::Ready(mesh.local_id().clone()));

    let mut ready = Vec::new();
    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            MeshEvent::Ready(id) => ready.push(id),
            MeshEvent::RegistrationRetry { rejected, .. } => {
                assert_eq!(rejected, taken);
                retries += 1;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(ready, vec![mesh.local_id().clone()]);
    assert!(retries >= 1);
}
