//! VlanNetworkDriver restart behaviour.

use ovsnet_common::OvsNetError;
use ovsnet_plugin::{NetworkDriver, VlanNetworkDriver};
use ovsnet_store::{MemoryStore, NetStore};
use ovsnet_test::fixtures::{binding, DPID_A};
use std::sync::Arc;

#[tokio::test]
async fn test_tags_survive_restart() {
    let store = Arc::new(MemoryStore::new());
    let mut driver = VlanNetworkDriver::load(store.clone()).await.unwrap();
    driver.create_network("n1").await.unwrap();
    driver.create_network("n2").await.unwrap();
    let n1 = driver.tag_of("n1").unwrap();
    let n2 = driver.tag_of("n2").unwrap();
    assert_ne!(n1, n2);

    let mut restarted = VlanNetworkDriver::load(store.clone()).await.unwrap();
    assert_eq!(restarted.tag_of("n1"), Some(n1));
    restarted.create_network("n3").await.unwrap();
    let n3 = restarted.tag_of("n3").unwrap();
    assert!(n3 != n1 && n3 != n2);
}

#[tokio::test]
async fn test_delete_and_double_delete() {
    let store = Arc::new(MemoryStore::new());
    let mut driver = VlanNetworkDriver::load(store.clone()).await.unwrap();
    driver.create_network("n1").await.unwrap();

    driver.delete_network("n1").await.unwrap();
    driver.delete_network("n1").await.unwrap();
    assert!(store.list_vlan_bindings().await.unwrap().is_empty());
    assert_eq!(driver.tag_of("n1"), None);
}

#[tokio::test]
async fn test_bind_unbind_and_sync() {
    let store = Arc::new(MemoryStore::new());
    let mut driver = VlanNetworkDriver::load(store.clone()).await.unwrap();
    driver.create_network("n1").await.unwrap();

    let b = binding("p1", "n1", DPID_A, 3);
    driver.bind_port(&b).await.unwrap();
    assert_eq!(store.get_port_binding("p1").await.unwrap(), Some(b));
    driver.unbind_port("p1").await.unwrap();
    driver.unbind_port("p1").await.unwrap();
    assert!(store.get_port_binding("p1").await.unwrap().is_none());

    store.set_unavailable(true);
    assert!(matches!(
        driver.sync_all().await,
        Err(OvsNetError::StoreUnavailable { .. })
    ));
}
