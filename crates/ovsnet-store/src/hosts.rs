//! Host node registration.
//!
//! A datapath id maps to exactly one tunnel endpoint, and a tunnel endpoint
//! belongs to exactly one datapath id.

use ovsnet_common::OvsNetResult;
use std::net::Ipv4Addr;
use tracing::{info, instrument, warn};

use crate::models::HostNode;
use crate::store::NetStore;

/// What [`register_host`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRegistration {
    /// The exact record already existed.
    Unchanged,
    /// First record for this dpid.
    Created,
    /// The dpid moved from `previous` to the new address.
    Replaced { previous: Ipv4Addr },
}

/// Records that `dpid` terminates tunnels at `address`.
///
/// Any other dpid still claiming `address` is deleted.
#[instrument(skip(store))]
pub async fn register_host(
    store: &dyn NetStore,
    dpid: &str,
    address: Ipv4Addr,
) -> OvsNetResult<HostRegistration> {
    let nodes = store.list_host_nodes().await?;

    for stale in nodes
        .iter()
        .filter(|n| n.address == address && n.dpid != dpid)
    {
        warn!(
            dpid = %stale.dpid,
            address = %address,
            "Deleting host node holding an address now claimed by another datapath"
        );
        store.delete_host_node(&stale.dpid).await?;
    }

    let outcome = match nodes.iter().find(|n| n.dpid == dpid) {
        Some(existing) if existing.address == address => return Ok(HostRegistration::Unchanged),
        Some(existing) => {
            warn!(
                dpid,
                previous = %existing.address,
                address = %address,
                "Host node address changed, replacing record"
            );
            HostRegistration::Replaced {
                previous: existing.address,
            }
        }
        None => HostRegistration::Created,
    };

    store
        .put_host_node(&HostNode {
            dpid: dpid.to_string(),
            address,
        })
        .await?;
    info!(dpid, address = %address, "Registered host node");
    Ok(outcome)
}

/// Resolves a tunnel endpoint address to its datapath id.
pub async fn dpid_for_address(
    store: &dyn NetStore,
    address: Ipv4Addr,
) -> OvsNetResult<Option<String>> {
    Ok(store
        .list_host_nodes()
        .await?
        .into_iter()
        .find(|n| n.address == address)
        .map(|n| n.dpid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    const IP_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const IP_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    #[tokio::test]
    async fn test_register_new_and_unchanged() {
        let store = MemoryStore::new();
        assert_eq!(
            register_host(&store, "a", IP_A).await.unwrap(),
            HostRegistration::Created
        );
        assert_eq!(
            register_host(&store, "a", IP_A).await.unwrap(),
            HostRegistration::Unchanged
        );
        assert_eq!(store.list_host_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_replaces_address() {
        let store = MemoryStore::new();
        register_host(&store, "a", IP_A).await.unwrap();
        assert_eq!(
            register_host(&store, "a", IP_B).await.unwrap(),
            HostRegistration::Replaced { previous: IP_A }
        );
        let nodes = store.list_host_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].address, IP_B);
    }

    #[tokio::test]
    async fn test_register_evicts_other_dpid_with_same_address() {
        let store = MemoryStore::new();
        register_host(&store, "a", IP_A).await.unwrap();
        register_host(&store, "b", IP_A).await.unwrap();

        let nodes = store.list_host_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].dpid, "b");
        assert_eq!(
            dpid_for_address(&store, IP_A).await.unwrap(),
            Some("b".to_string())
        );
        assert_eq!(dpid_for_address(&store, IP_B).await.unwrap(), None);
    }
}
