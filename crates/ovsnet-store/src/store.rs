//! The `NetStore` trait: the single source of truth shared by every agent
//! and by the plugin.

use async_trait::async_trait;
use ovsnet_common::OvsNetResult;
use std::collections::{BTreeSet, HashMap};

use crate::models::{
    ControllerServer, HostNode, HostPair, PortBinding, PortStatus, TunnelKeyBinding,
    TunnelKeySnapshot, VlanBinding,
};

/// Table names, shared by the backends and by log fields.
pub mod tables {
    pub const PORT_BINDING: &str = "PORT_BINDING";
    pub const PORT_STATUS: &str = "PORT_STATUS";
    pub const VLAN_BINDING: &str = "VLAN_BINDING";
    pub const TUNNEL_KEY: &str = "TUNNEL_KEY";
    pub const TUNNEL_KEY_INDEX: &str = "TUNNEL_KEY_INDEX";
    pub const TUNNEL_KEY_LAST: &str = "TUNNEL_KEY_LAST";
    pub const TUNNEL_KEY_VERSION: &str = "TUNNEL_KEY_VERSION";
    pub const HOST_NODE: &str = "HOST_NODE";
    pub const TUNNEL_PORT_REQUEST: &str = "TUNNEL_PORT_REQUEST";
    pub const CONTROLLER_SERVER: &str = "CONTROLLER_SERVER";
}

/// Persistent store operations.
///
/// Every method may fail with `StoreUnavailable`. Deletes report whether a
/// row was removed; a missing row is never an error on delete.
#[async_trait]
pub trait NetStore: Send + Sync {
    // Port bindings

    async fn list_port_bindings(&self) -> OvsNetResult<Vec<PortBinding>>;

    async fn get_port_binding(&self, port_id: &str) -> OvsNetResult<Option<PortBinding>>;

    async fn put_port_binding(&self, binding: &PortBinding) -> OvsNetResult<()>;

    async fn delete_port_binding(&self, port_id: &str) -> OvsNetResult<bool>;

    /// Bindings on one network.
    async fn port_bindings_for_network(&self, network_id: &str) -> OvsNetResult<Vec<PortBinding>> {
        Ok(self
            .list_port_bindings()
            .await?
            .into_iter()
            .filter(|b| b.network_id == network_id)
            .collect())
    }

    /// Bindings on one host.
    async fn port_bindings_for_dpid(&self, dpid: &str) -> OvsNetResult<Vec<PortBinding>> {
        Ok(self
            .list_port_bindings()
            .await?
            .into_iter()
            .filter(|b| b.dpid == dpid)
            .collect())
    }

    // Port operational status

    async fn set_port_status(&self, port_id: &str, status: PortStatus) -> OvsNetResult<()>;

    async fn get_port_status(&self, port_id: &str) -> OvsNetResult<Option<PortStatus>>;

    async fn list_port_statuses(&self) -> OvsNetResult<HashMap<String, PortStatus>>;

    // VLAN bindings

    async fn list_vlan_bindings(&self) -> OvsNetResult<Vec<VlanBinding>>;

    async fn put_vlan_binding(&self, binding: &VlanBinding) -> OvsNetResult<()>;

    async fn delete_vlan_binding(&self, network_id: &str) -> OvsNetResult<bool>;

    // Tunnel keys

    async fn list_tunnel_keys(&self) -> OvsNetResult<Vec<TunnelKeyBinding>>;

    async fn get_tunnel_key(&self, network_id: &str) -> OvsNetResult<Option<u32>>;

    /// Removes the key of `network_id` and bumps the version. A cursor at or
    /// above the freed key is rewound to just below it, so the freed key is
    /// the next one issued.
    async fn delete_tunnel_key(&self, network_id: &str) -> OvsNetResult<bool>;

    /// Reads cursor rows, allocated keys and the current version together.
    async fn tunnel_key_snapshot(&self) -> OvsNetResult<TunnelKeySnapshot>;

    /// Atomically inserts `binding` and replaces every cursor row with
    /// `cursor`.
    ///
    /// Fails with `Conflict` if the version moved since `version` was read,
    /// if the key is already bound, or if the network already holds a key.
    async fn commit_tunnel_key(
        &self,
        version: u64,
        binding: &TunnelKeyBinding,
        cursor: u32,
    ) -> OvsNetResult<()>;

    // Host nodes

    async fn list_host_nodes(&self) -> OvsNetResult<Vec<HostNode>>;

    async fn put_host_node(&self, node: &HostNode) -> OvsNetResult<()>;

    async fn delete_host_node(&self, dpid: &str) -> OvsNetResult<bool>;

    // Tunnel port requests

    async fn list_tunnel_requests(&self) -> OvsNetResult<BTreeSet<HostPair>>;

    /// Returns true if the pair was not already requested.
    async fn add_tunnel_request(&self, pair: &HostPair) -> OvsNetResult<bool>;

    async fn remove_tunnel_request(&self, pair: &HostPair) -> OvsNetResult<bool>;

    async fn replace_tunnel_requests(&self, pairs: &BTreeSet<HostPair>) -> OvsNetResult<()>;

    // Controller servers

    async fn set_controller_server(&self, server: &ControllerServer) -> OvsNetResult<()>;

    async fn list_controller_servers(&self) -> OvsNetResult<Vec<ControllerServer>>;
}
