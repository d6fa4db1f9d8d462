//! In-process store backend.
//!
//! Used by the unit and scenario tests and by single-host deployments that
//! do not need the state to outlive the process. Conflicts and outages can
//! be injected to exercise the retry and degrade paths.

use async_trait::async_trait;
use ovsnet_common::{OvsNetError, OvsNetResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    ControllerServer, HostNode, HostPair, PortBinding, PortStatus, ServerKind, TunnelKeyBinding,
    TunnelKeySnapshot, VlanBinding,
};
use crate::store::{tables, NetStore};

#[derive(Debug, Default)]
struct Inner {
    port_bindings: BTreeMap<String, PortBinding>,
    port_status: HashMap<String, PortStatus>,
    vlan_bindings: BTreeMap<String, u16>,
    tunnel_keys: BTreeMap<String, u32>,
    tunnel_key_cursors: Vec<u32>,
    tunnel_key_version: u64,
    host_nodes: BTreeMap<String, HostNode>,
    tunnel_requests: BTreeSet<HostPair>,
    controller_servers: BTreeMap<ServerKind, String>,

    unavailable: bool,
    pending_conflicts: usize,
    commits: usize,
    conflicts: usize,
}

/// Mutex-guarded in-memory [`NetStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` tunnel-key commits fail with `Conflict`.
    pub fn inject_conflicts(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending_conflicts = count;
        }
    }

    /// While set, every operation fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    /// Seeds extra cursor rows, as left behind by a past race.
    pub fn push_tunnel_key_cursor(&self, cursor: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tunnel_key_cursors.push(cursor);
        }
    }

    /// Current cursor rows.
    pub fn tunnel_key_cursors(&self) -> Vec<u32> {
        self.inner
            .lock()
            .map(|inner| inner.tunnel_key_cursors.clone())
            .unwrap_or_default()
    }

    /// Number of successful tunnel-key commits.
    pub fn commit_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.commits).unwrap_or(0)
    }

    /// Number of rejected tunnel-key commits.
    pub fn conflict_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.conflicts).unwrap_or(0)
    }

    fn lock(&self, operation: &str) -> OvsNetResult<MutexGuard<'_, Inner>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| OvsNetError::internal("memory store lock poisoned"))?;
        if inner.unavailable {
            return Err(OvsNetError::store(operation, "store marked unavailable"));
        }
        Ok(inner)
    }
}

#[async_trait]
impl NetStore for MemoryStore {
    async fn list_port_bindings(&self) -> OvsNetResult<Vec<PortBinding>> {
        let inner = self.lock("list_port_bindings")?;
        Ok(inner.port_bindings.values().cloned().collect())
    }

    async fn get_port_binding(&self, port_id: &str) -> OvsNetResult<Option<PortBinding>> {
        let inner = self.lock("get_port_binding")?;
        Ok(inner.port_bindings.get(port_id).cloned())
    }

    async fn put_port_binding(&self, binding: &PortBinding) -> OvsNetResult<()> {
        let mut inner = self.lock("put_port_binding")?;
        inner
            .port_bindings
            .insert(binding.port_id.clone(), binding.clone());
        Ok(())
    }

    async fn delete_port_binding(&self, port_id: &str) -> OvsNetResult<bool> {
        let mut inner = self.lock("delete_port_binding")?;
        Ok(inner.port_bindings.remove(port_id).is_some())
    }

    async fn set_port_status(&self, port_id: &str, status: PortStatus) -> OvsNetResult<()> {
        let mut inner = self.lock("set_port_status")?;
        inner.port_status.insert(port_id.to_string(), status);
        Ok(())
    }

    async fn get_port_status(&self, port_id: &str) -> OvsNetResult<Option<PortStatus>> {
        let inner = self.lock("get_port_status")?;
        Ok(inner.port_status.get(port_id).copied())
    }

    async fn list_port_statuses(&self) -> OvsNetResult<HashMap<String, PortStatus>> {
        let inner = self.lock("list_port_statuses")?;
        Ok(inner.port_status.clone())
    }

    async fn list_vlan_bindings(&self) -> OvsNetResult<Vec<VlanBinding>> {
        let inner = self.lock("list_vlan_bindings")?;
        Ok(inner
            .vlan_bindings
            .iter()
            .map(|(network_id, tag)| VlanBinding {
                vlan_tag: *tag,
                network_id: network_id.clone(),
            })
            .collect())
    }

    async fn put_vlan_binding(&self, binding: &VlanBinding) -> OvsNetResult<()> {
        let mut inner = self.lock("put_vlan_binding")?;
        inner
            .vlan_bindings
            .insert(binding.network_id.clone(), binding.vlan_tag);
        Ok(())
    }

    async fn delete_vlan_binding(&self, network_id: &str) -> OvsNetResult<bool> {
        let mut inner = self.lock("delete_vlan_binding")?;
        Ok(inner.vlan_bindings.remove(network_id).is_some())
    }

    async fn list_tunnel_keys(&self) -> OvsNetResult<Vec<TunnelKeyBinding>> {
        let inner = self.lock("list_tunnel_keys")?;
        Ok(inner
            .tunnel_keys
            .iter()
            .map(|(network_id, key)| TunnelKeyBinding {
                network_id: network_id.clone(),
                tunnel_key: *key,
            })
            .collect())
    }

    async fn get_tunnel_key(&self, network_id: &str) -> OvsNetResult<Option<u32>> {
        let inner = self.lock("get_tunnel_key")?;
        Ok(inner.tunnel_keys.get(network_id).copied())
    }

    async fn delete_tunnel_key(&self, network_id: &str) -> OvsNetResult<bool> {
        let mut inner = self.lock("delete_tunnel_key")?;
        let Some(freed) = inner.tunnel_keys.remove(network_id) else {
            return Ok(false);
        };
        if inner.tunnel_key_cursors.iter().max().is_some_and(|&last| last >= freed) {
            inner.tunnel_key_cursors = vec![freed.saturating_sub(1)];
        }
        inner.tunnel_key_version += 1;
        Ok(true)
    }

    async fn tunnel_key_snapshot(&self) -> OvsNetResult<TunnelKeySnapshot> {
        let inner = self.lock("tunnel_key_snapshot")?;
        Ok(TunnelKeySnapshot {
            cursors: inner.tunnel_key_cursors.clone(),
            allocated: inner
                .tunnel_keys
                .iter()
                .map(|(network_id, key)| TunnelKeyBinding {
                    network_id: network_id.clone(),
                    tunnel_key: *key,
                })
                .collect(),
            version: inner.tunnel_key_version,
        })
    }

    async fn commit_tunnel_key(
        &self,
        version: u64,
        binding: &TunnelKeyBinding,
        cursor: u32,
    ) -> OvsNetResult<()> {
        let mut inner = self.lock("commit_tunnel_key")?;

        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            inner.conflicts += 1;
            return Err(OvsNetError::conflict(tables::TUNNEL_KEY));
        }

        let key_taken = inner
            .tunnel_keys
            .values()
            .any(|k| *k == binding.tunnel_key);
        if inner.tunnel_key_version != version
            || key_taken
            || inner.tunnel_keys.contains_key(&binding.network_id)
        {
            inner.conflicts += 1;
            return Err(OvsNetError::conflict(tables::TUNNEL_KEY));
        }

        inner
            .tunnel_keys
            .insert(binding.network_id.clone(), binding.tunnel_key);
        inner.tunnel_key_cursors = vec![cursor];
        inner.tunnel_key_version += 1;
        inner.commits += 1;
        Ok(())
    }

    async fn list_host_nodes(&self) -> OvsNetResult<Vec<HostNode>> {
        let inner = self.lock("list_host_nodes")?;
        Ok(inner.host_nodes.values().cloned().collect())
    }

    async fn put_host_node(&self, node: &HostNode) -> OvsNetResult<()> {
        let mut inner = self.lock("put_host_node")?;
        inner.host_nodes.insert(node.dpid.clone(), node.clone());
        Ok(())
    }

    async fn delete_host_node(&self, dpid: &str) -> OvsNetResult<bool> {
        let mut inner = self.lock("delete_host_node")?;
        Ok(inner.host_nodes.remove(dpid).is_some())
    }

    async fn list_tunnel_requests(&self) -> OvsNetResult<BTreeSet<HostPair>> {
        let inner = self.lock("list_tunnel_requests")?;
        Ok(inner.tunnel_requests.clone())
    }

    async fn add_tunnel_request(&self, pair: &HostPair) -> OvsNetResult<bool> {
        let mut inner = self.lock("add_tunnel_request")?;
        Ok(inner.tunnel_requests.insert(pair.clone()))
    }

    async fn remove_tunnel_request(&self, pair: &HostPair) -> OvsNetResult<bool> {
        let mut inner = self.lock("remove_tunnel_request")?;
        Ok(inner.tunnel_requests.remove(pair))
    }

    async fn replace_tunnel_requests(&self, pairs: &BTreeSet<HostPair>) -> OvsNetResult<()> {
        let mut inner = self.lock("replace_tunnel_requests")?;
        inner.tunnel_requests = pairs.clone();
        Ok(())
    }

    async fn set_controller_server(&self, server: &ControllerServer) -> OvsNetResult<()> {
        let mut inner = self.lock("set_controller_server")?;
        inner
            .controller_servers
            .insert(server.kind, server.address.clone());
        Ok(())
    }

    async fn list_controller_servers(&self) -> OvsNetResult<Vec<ControllerServer>> {
        let inner = self.lock("list_controller_servers")?;
        Ok(inner
            .controller_servers
            .iter()
            .map(|(kind, address)| ControllerServer {
                kind: *kind,
                address: address.clone(),
            })
            .collect())
    }
}
