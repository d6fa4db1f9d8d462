//! RedisStore integration tests against a containerized Redis.

use ovsnet_alloc::{KeyRange, TunnelKeyAllocator};
use ovsnet_common::OvsNetError;
use ovsnet_store::{
    register_host, tables, ControllerServer, HostPair, HostRegistration, NetStore, PortStatus,
    RedisStore, ServerKind, TunnelKeyBinding,
};
use ovsnet_test::fixtures::{binding, host, DPID_A, DPID_B, IP_A, IP_B};
use ovsnet_test::{RedisTestEnv, StoreVerifier};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;

async fn setup() -> (RedisTestEnv, RedisStore) {
    let env = RedisTestEnv::start().await.expect("Failed to start Redis");
    let store = RedisStore::connect(&env.url())
        .await
        .expect("Failed to connect store");
    (env, store)
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_port_bindings_and_status() {
    let (env, store) = setup().await;

    let b = binding("vif-1", "net-1", DPID_A, 3);
    store.put_port_binding(&b).await.unwrap();
    assert_eq!(store.get_port_binding("vif-1").await.unwrap(), Some(b));
    assert!(env.exists(tables::PORT_BINDING).await.unwrap());
    let fields: Vec<String> = env
        .hgetall(tables::PORT_BINDING)
        .await
        .unwrap()
        .into_iter()
        .map(|(field, _)| field)
        .collect();
    assert_eq!(fields, vec!["vif-1".to_string()]);

    store.set_port_status("vif-1", PortStatus::Up).await.unwrap();
    assert!(store.delete_port_binding("vif-1").await.unwrap());
    assert!(!store.delete_port_binding("vif-1").await.unwrap());
    assert!(env.hgetall(tables::PORT_BINDING).await.unwrap().is_empty());

    // status outlives the binding
    StoreVerifier::new(&store)
        .assert_port_status("vif-1", Some(PortStatus::Up))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_tunnel_key_commit_conflicts() {
    let (_env, store) = setup().await;

    let snap = store.tunnel_key_snapshot().await.unwrap();
    let first = TunnelKeyBinding {
        network_id: "net-1".into(),
        tunnel_key: 1,
    };
    store.commit_tunnel_key(snap.version, &first, 1).await.unwrap();

    // stale version
    let second = TunnelKeyBinding {
        network_id: "net-2".into(),
        tunnel_key: 2,
    };
    assert!(matches!(
        store.commit_tunnel_key(snap.version, &second, 2).await,
        Err(OvsNetError::Conflict { .. })
    ));

    // key already bound
    let snap = store.tunnel_key_snapshot().await.unwrap();
    let taken = TunnelKeyBinding {
        network_id: "net-2".into(),
        tunnel_key: 1,
    };
    assert!(matches!(
        store.commit_tunnel_key(snap.version, &taken, 1).await,
        Err(OvsNetError::Conflict { .. })
    ));

    assert_eq!(store.get_tunnel_key("net-1").await.unwrap(), Some(1));
    assert_eq!(snap.cursors, vec![1]);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_freed_tunnel_key_issued_next() {
    let (_env, store) = setup().await;
    let alloc = TunnelKeyAllocator::new(Arc::new(store), KeyRange::default());
    for i in 1..=4 {
        alloc.allocate(&format!("net-{}", i)).await.unwrap();
    }

    alloc.delete("net-2").await.unwrap();
    assert_eq!(alloc.allocate("net-5").await.unwrap(), 2);
    assert_eq!(alloc.allocate("net-6").await.unwrap(), 5);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_concurrent_allocators_never_share_keys() {
    let (env, store) = setup().await;
    let second = RedisStore::connect(&env.url()).await.unwrap();

    let a = TunnelKeyAllocator::new(Arc::new(store), KeyRange::default());
    let b = TunnelKeyAllocator::new(Arc::new(second), KeyRange::default());

    let left = tokio::spawn(async move {
        for i in 0..20 {
            a.allocate(&format!("left-{}", i)).await.unwrap();
        }
    });
    let right = tokio::spawn(async move {
        for i in 0..20 {
            b.allocate(&format!("right-{}", i)).await.unwrap();
        }
    });
    left.await.unwrap();
    right.await.unwrap();

    let store = RedisStore::connect(&env.url()).await.unwrap();
    assert_eq!(store.list_tunnel_keys().await.unwrap().len(), 40);
    StoreVerifier::new(&store)
        .assert_tunnel_keys_unique()
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_hosts_requests_and_servers() {
    let (_env, store) = setup().await;

    store.put_host_node(&host(DPID_A, IP_A)).await.unwrap();
    let outcome = register_host(&store, DPID_B, IP_A).await.unwrap();
    assert_eq!(outcome, HostRegistration::Created);
    assert_eq!(store.list_host_nodes().await.unwrap(), vec![host(DPID_B, IP_A)]);
    register_host(&store, DPID_B, IP_B).await.unwrap();

    let pair = HostPair::new(DPID_B, DPID_A).unwrap();
    assert!(store.add_tunnel_request(&pair).await.unwrap());
    assert!(!store.add_tunnel_request(&pair).await.unwrap());
    store.replace_tunnel_requests(&BTreeSet::new()).await.unwrap();
    assert!(store.list_tunnel_requests().await.unwrap().is_empty());

    let server = ControllerServer {
        kind: ServerKind::Openflow,
        address: "10.0.0.9:6633".into(),
    };
    store.set_controller_server(&server).await.unwrap();
    assert_eq!(store.list_controller_servers().await.unwrap(), vec![server]);
}
