//! Incremental request maintenance and local tunnel convergence.

use ovsnet_bridge::{BridgeDriver, BridgeView};
use ovsnet_common::NW_ID_VPORT_GRE;
use ovsnet_mesh::{gre_port_name, TunnelMeshPlanner};
use ovsnet_store::{HostPair, MemoryStore, NetStore};
use ovsnet_test::fixtures::{binding, host, DPID_A, DPID_B, DPID_C, IP_A, IP_B, IP_C};
use ovsnet_test::{
    ControllerCall, ControllerResponse, FakeBridge, RecordingController, StoreVerifier,
};
use pretty_assertions::assert_eq;
use std::net::Ipv4Addr;
use std::sync::Arc;

fn setup() -> (Arc<MemoryStore>, TunnelMeshPlanner) {
    let store = Arc::new(MemoryStore::new());
    let planner = TunnelMeshPlanner::new(store.clone());
    (store, planner)
}

async fn bind(store: &MemoryStore, planner: &TunnelMeshPlanner, port: &str, net: &str, dpid: &str, no: u32) -> usize {
    store.put_port_binding(&binding(port, net, dpid, no)).await.unwrap();
    planner.on_port_added(net, dpid, no).await.unwrap()
}

async fn unbind(store: &MemoryStore, planner: &TunnelMeshPlanner, port: &str, net: &str, dpid: &str, no: u32) -> usize {
    store.delete_port_binding(port).await.unwrap();
    planner.on_port_removed(net, dpid, no).await.unwrap()
}

#[tokio::test]
async fn test_rebuild_three_hosts_two_networks() {
    let (store, planner) = setup();
    for b in [
        binding("p1", "n1", DPID_A, 1),
        binding("p2", "n1", DPID_B, 1),
        binding("p3", "n2", DPID_B, 2),
        binding("p4", "n2", DPID_C, 1),
    ] {
        store.put_port_binding(&b).await.unwrap();
    }

    planner.rebuild().await.unwrap();
    planner.rebuild().await.unwrap();

    StoreVerifier::new(store.as_ref())
        .assert_tunnel_requests(&[(DPID_A, DPID_B), (DPID_B, DPID_C)])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_incremental_add_only_on_first_port() {
    let (store, planner) = setup();

    assert_eq!(bind(&store, &planner, "p1", "n1", DPID_A, 1).await, 0);
    assert_eq!(bind(&store, &planner, "p2", "n1", DPID_B, 1).await, 1);
    // second port of the same network on B adds nothing
    assert_eq!(bind(&store, &planner, "p3", "n1", DPID_B, 2).await, 0);
    assert_eq!(bind(&store, &planner, "p4", "n1", DPID_C, 1).await, 2);

    StoreVerifier::new(store.as_ref())
        .assert_tunnel_requests(&[(DPID_A, DPID_B), (DPID_A, DPID_C), (DPID_B, DPID_C)])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_incremental_remove_keeps_justified_pairs() {
    let (store, planner) = setup();
    bind(&store, &planner, "p1", "n1", DPID_A, 1).await;
    bind(&store, &planner, "p2", "n1", DPID_B, 1).await;
    bind(&store, &planner, "p3", "n1", DPID_B, 2).await;
    bind(&store, &planner, "p4", "n2", DPID_A, 2).await;
    bind(&store, &planner, "p5", "n2", DPID_B, 3).await;

    // B still has p3 on n1
    assert_eq!(unbind(&store, &planner, "p2", "n1", DPID_B, 1).await, 0);
    // B leaves n1 but still shares n2 with A
    assert_eq!(unbind(&store, &planner, "p3", "n1", DPID_B, 2).await, 0);
    StoreVerifier::new(store.as_ref())
        .assert_tunnel_requests(&[(DPID_A, DPID_B)])
        .await
        .unwrap();

    // last shared network gone
    assert_eq!(unbind(&store, &planner, "p5", "n2", DPID_B, 3).await, 1);
    assert!(store.list_tunnel_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_incremental_matches_rebuild() {
    let (store, planner) = setup();
    bind(&store, &planner, "p1", "n1", DPID_A, 1).await;
    bind(&store, &planner, "p2", "n1", DPID_B, 1).await;
    bind(&store, &planner, "p3", "n2", DPID_C, 1).await;
    bind(&store, &planner, "p4", "n2", DPID_B, 2).await;
    unbind(&store, &planner, "p1", "n1", DPID_A, 1).await;

    let incremental = store.list_tunnel_requests().await.unwrap();
    let rebuilt = planner.rebuild().await.unwrap();
    assert_eq!(incremental, rebuilt);
}

async fn mesh_host(store: &MemoryStore) {
    for h in [host(DPID_A, IP_A), host(DPID_B, IP_B), host(DPID_C, IP_C)] {
        store.put_host_node(&h).await.unwrap();
    }
}

#[tokio::test]
async fn test_reconcile_local_adds_and_removes() {
    let (store, planner) = setup();
    mesh_host(&store).await;
    store
        .add_tunnel_request(&HostPair::new(DPID_A, DPID_B).unwrap())
        .await
        .unwrap();

    let bridge = FakeBridge::new("br-int", DPID_A);
    // stale tunnel to C and one to an address nobody owns
    bridge.attach_tunnel("greold-c", 50, IP_A, IP_C);
    bridge.attach_tunnel("greold-x", 51, IP_A, Ipv4Addr::new(10, 9, 9, 9));
    let controller = RecordingController::new();

    let view = BridgeView::snapshot(&bridge).await.unwrap();
    let delta = planner
        .reconcile_local(DPID_A, IP_A, &bridge, &view.tunnel_ports, &controller)
        .await
        .unwrap();

    let name = gre_port_name(IP_A, IP_B);
    assert_eq!(delta.added, vec![name.clone()]);
    assert_eq!(delta.removed.len(), 2);
    assert_eq!(delta.errors, 0);
    assert!(bridge.has_port(&name));
    assert!(!bridge.has_port("greold-c"));
    assert!(!bridge.has_port("greold-x"));
    assert_eq!(
        bridge.port(&name).unwrap().options.get("key").map(String::as_str),
        Some("flow")
    );

    let ofport = bridge.get_ofport(&name).await.unwrap().unwrap();
    let calls = controller.calls();
    assert!(calls.contains(&ControllerCall::CreatePort {
        network_id: NW_ID_VPORT_GRE.into(),
        dpid: DPID_A.into(),
        port_no: ofport,
    }));
    assert!(calls.contains(&ControllerCall::UpdateRemoteDpid {
        dpid: DPID_A.into(),
        port_no: ofport,
        remote_dpid: DPID_B.into(),
    }));

    // converged: a second pass does nothing
    let view = BridgeView::snapshot(&bridge).await.unwrap();
    let delta = planner
        .reconcile_local(DPID_A, IP_A, &bridge, &view.tunnel_ports, &controller)
        .await
        .unwrap();
    assert!(delta.is_empty());
}

#[tokio::test]
async fn test_reconcile_local_skips_peer_without_host_node() {
    let (store, planner) = setup();
    store.put_host_node(&host(DPID_A, IP_A)).await.unwrap();
    store
        .add_tunnel_request(&HostPair::new(DPID_A, DPID_B).unwrap())
        .await
        .unwrap();

    let bridge = FakeBridge::new("br-int", DPID_A);
    let controller = RecordingController::new();
    let delta = planner
        .reconcile_local(DPID_A, IP_A, &bridge, &[], &controller)
        .await
        .unwrap();
    assert!(delta.is_empty());
    assert!(controller.calls().is_empty());
}

#[tokio::test]
async fn test_reconcile_local_rolls_back_unannounced_port() {
    let (store, planner) = setup();
    mesh_host(&store).await;
    store
        .add_tunnel_request(&HostPair::new(DPID_A, DPID_B).unwrap())
        .await
        .unwrap();

    let bridge = FakeBridge::new("br-int", DPID_A);
    let controller = RecordingController::new();
    controller.respond_with(ControllerResponse::Unavailable);

    let delta = planner
        .reconcile_local(DPID_A, IP_A, &bridge, &[], &controller)
        .await
        .unwrap();
    assert_eq!(delta.errors, 1);
    assert!(!bridge.has_port(&gre_port_name(IP_A, IP_B)));

    // controller back: the next pass creates it
    controller.respond_with(ControllerResponse::Ok);
    let delta = planner
        .reconcile_local(DPID_A, IP_A, &bridge, &[], &controller)
        .await
        .unwrap();
    assert_eq!(delta.added.len(), 1);
}

#[tokio::test]
async fn test_reconcile_local_store_failure() {
    let (store, planner) = setup();
    store.set_unavailable(true);
    let bridge = FakeBridge::new("br-int", DPID_A);
    let controller = RecordingController::new();
    assert!(planner
        .reconcile_local(DPID_A, IP_A, &bridge, &[], &controller)
        .await
        .is_err());
}

#[tokio::test]
async fn test_adopt_tunnels() {
    let (store, planner) = setup();
    mesh_host(&store).await;

    let bridge = FakeBridge::new("br-int", DPID_A);
    bridge.attach_tunnel(&gre_port_name(IP_A, IP_B), 60, IP_A, IP_B);
    bridge.attach_tunnel("grestale", 61, IP_A, Ipv4Addr::new(10, 9, 9, 9));
    let controller = RecordingController::new();

    let view = BridgeView::snapshot(&bridge).await.unwrap();
    let delta = planner
        .adopt_tunnels(DPID_A, &bridge, &view.tunnel_ports, &controller)
        .await
        .unwrap();

    assert_eq!(delta.adopted, vec![gre_port_name(IP_A, IP_B)]);
    assert_eq!(delta.removed, vec!["grestale".to_string()]);
    assert!(!bridge.has_port("grestale"));

    let calls = controller.calls();
    assert_eq!(calls[0], ControllerCall::UpdateNetwork(NW_ID_VPORT_GRE.into()));
    assert!(calls.contains(&ControllerCall::UpdateRemoteDpid {
        dpid: DPID_A.into(),
        port_no: 60,
        remote_dpid: DPID_B.into(),
    }));
    assert!(calls.contains(&ControllerCall::DeleteRemoteDpid {
        dpid: DPID_A.into(),
        port_no: 61,
    }));
}
