//! Rendezvous broker end to end: claims over a real socket, and two meshes
//! finding each other through it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use discreet_core::{seed_snapshot, InventoryStore, Snapshot};
use discreet_sync::{
    BrokerConfig, BrokerDirectory, BrokerDirectoryConfig, BrokerHandle, BrokerServer, MeshConfig,
    PeerDirectory, PeerId, PeerMesh, SyncError,
};

async fn broker() -> BrokerHandle {
    BrokerServer::new(BrokerConfig {
        bind_addr: "127.0.0.1".into(),
        port: 0,
    })
    .start()
    .await
    .unwrap()
}

async fn directory(broker: &BrokerHandle) -> BrokerDirectory {
    BrokerDirectory::connect(BrokerDirectoryConfig::new(broker.url()))
        .await
        .unwrap()
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

async fn wait_for_claims(broker: &BrokerHandle, expected: usize) {
    for _ in 0..100 {
        if broker.claim_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("broker never reached {expected} claims");
}

#[tokio::test]
async fn test_claim_resolve_and_collision() {
    let broker = broker().await;
    let first = directory(&broker).await;
    let second = directory(&broker).await;
    let id = PeerId::parse("dsc-1234").unwrap();

    first.claim(&id, addr(5000)).await.unwrap();
    assert_eq!(second.resolve(&id).await.unwrap(), addr(5000));

    let collision = second.claim(&id, addr(5001)).await;
    assert!(matches!(collision, Err(SyncError::IdentifierCollision(_))));

    let unknown = second.resolve(&PeerId::parse("dsc-9999").unwrap()).await;
    assert!(matches!(unknown, Err(SyncError::PeerNotFound(_))));

    first.release(&id).await.unwrap();
    second.claim(&id, addr(5001)).await.unwrap();
    assert_eq!(first.resolve(&id).await.unwrap(), addr(5001));
}

#[tokio::test]
async fn test_closed_session_frees_its_identifiers() {
    let broker = broker().await;
    let first = directory(&broker).await;
    let id = PeerId::parse("dsc-4321").unwrap();

    first.claim(&id, addr(5000)).await.unwrap();
    wait_for_claims(&broker, 1).await;

    drop(first);
    wait_for_claims(&broker, 0).await;

    let second = directory(&broker).await;
    second.claim(&id, addr(5002)).await.unwrap();
}

#[tokio::test]
async fn test_meshes_link_through_broker() {
    let broker = broker().await;

    let a_store = Arc::new(InventoryStore::new(Snapshot::empty()));
    let (a, _a_events) = PeerMesh::start(
        MeshConfig::loopback("dsc"),
        Arc::new(directory(&broker).await),
        a_store.clone(),
    )
    .await
    .unwrap();

    let (b, _b_events) = PeerMesh::start(
        MeshConfig::loopback("dsc"),
        Arc::new(directory(&broker).await),
        Arc::new(InventoryStore::new(seed_snapshot())),
    )
    .await
    .unwrap();

    wait_for_claims(&broker, 2).await;
    a.connect(b.local_id().as_str()).await.unwrap();

    for _ in 0..100 {
        if a_store.current() == seed_snapshot() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(a_store.current(), seed_snapshot());

    a.disconnect().await.unwrap();
    wait_for_claims(&broker, 1).await;

    broker.shutdown().await.unwrap();
}

/// Binds a broker on a fixed port, waiting for the previous owner of the
/// port to let go of it.
async fn broker_on(port: u16) -> BrokerHandle {
    for _ in 0..50 {
        let started = BrokerServer::new(BrokerConfig {
            bind_addr: "127.0.0.1".into(),
            port,
        })
        .start()
        .await;
        if let Ok(broker) = started {
            return broker;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("port {port} never became free");
}

#[tokio::test]
async fn test_claims_come_back_after_broker_restart() {
    let first = broker().await;
    let port = first.local_addr().port();

    let config = BrokerDirectoryConfig::new(first.url()).with_ping_interval(Duration::from_millis(100));
    let held = BrokerDirectory::connect(config).await.unwrap();
    let id = PeerId::parse("dsc-7777").unwrap();
    held.claim(&id, addr(5003)).await.unwrap();
    wait_for_claims(&first, 1).await;

    first.shutdown().await.unwrap();
    let restarted = broker_on(port).await;
    assert_eq!(restarted.url(), first.url());

    // No request goes through `held` here: the claim has to come back on
    // its own.
    wait_for_claims(&restarted, 1).await;

    let other = directory(&restarted).await;
    assert_eq!(other.resolve(&id).await.unwrap(), addr(5003));

    restarted.shutdown().await.unwrap();
}
