//! Tunnel mesh planning.
//!
//! Two hosts need a direct tunnel when some network has port bindings on
//! both. The planner keeps the persisted request set equal to that
//! relation, either from scratch ([`TunnelMeshPlanner::rebuild`]) or
//! incrementally as bindings come and go, and converges the tunnel ports of
//! one host towards the requests touching it.

use ovsnet_bridge::{BridgeDriver, TunnelPort};
use ovsnet_common::{OvsNetError, OvsNetResult, NW_ID_VPORT_GRE};
use ovsnet_controller::{best_effort, tolerate, ControllerClient};
use ovsnet_store::{HostPair, NetStore, PortBinding};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::naming::gre_port_name;

/// GRE key option; the key is set per flow by the controller.
const FLOW_KEY: &str = "flow";

/// Host pairs required by `bindings`.
pub fn required_pairs(bindings: &[PortBinding]) -> BTreeSet<HostPair> {
    let mut hosts_by_network: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for b in bindings {
        hosts_by_network
            .entry(b.network_id.as_str())
            .or_default()
            .insert(b.dpid.as_str());
    }

    let mut pairs = BTreeSet::new();
    for hosts in hosts_by_network.values() {
        let hosts: Vec<&str> = hosts.iter().copied().collect();
        for (i, a) in hosts.iter().enumerate() {
            for b in &hosts[i + 1..] {
                if let Some(pair) = HostPair::new(*a, *b) {
                    pairs.insert(pair);
                }
            }
        }
    }
    pairs
}

/// Outcome of one local convergence pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshDelta {
    /// Tunnel ports created.
    pub added: Vec<String>,
    /// Tunnel ports deleted.
    pub removed: Vec<String>,
    /// Existing tunnel ports re-announced to the controller.
    pub adopted: Vec<String>,
    /// Ports whose change failed and will be retried on the next pass.
    pub errors: usize,
}

impl MeshDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.errors == 0
    }
}

/// Maintains tunnel requests in the store and converges local tunnels.
#[derive(Clone)]
pub struct TunnelMeshPlanner {
    store: Arc<dyn NetStore>,
}

impl TunnelMeshPlanner {
    pub fn new(store: Arc<dyn NetStore>) -> Self {
        Self { store }
    }

    /// Recomputes the whole request set from the current bindings.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> OvsNetResult<BTreeSet<HostPair>> {
        let bindings = self.store.list_port_bindings().await?;
        let pairs = required_pairs(&bindings);
        self.store.replace_tunnel_requests(&pairs).await?;
        info!(
            bindings = bindings.len(),
            pairs = pairs.len(),
            "Rebuilt tunnel requests"
        );
        Ok(pairs)
    }

    /// Adds the pairs created by a new binding of `port_no` on `dpid`.
    ///
    /// Nothing changes unless this is the first binding of `network_id` on
    /// `dpid`. Returns the number of pairs added.
    #[instrument(skip(self))]
    pub async fn on_port_added(
        &self,
        network_id: &str,
        dpid: &str,
        port_no: u32,
    ) -> OvsNetResult<usize> {
        let on_network = self.store.port_bindings_for_network(network_id).await?;
        if on_network
            .iter()
            .any(|b| b.dpid == dpid && b.port_no != port_no)
        {
            debug!("Host already has ports on this network");
            return Ok(0);
        }

        let peers: BTreeSet<&str> = on_network
            .iter()
            .filter(|b| b.dpid != dpid)
            .map(|b| b.dpid.as_str())
            .collect();

        let mut added = 0;
        for peer in peers {
            if let Some(pair) = HostPair::new(dpid, peer) {
                if self.store.add_tunnel_request(&pair).await? {
                    info!(pair = %pair, "Requested tunnel");
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Drops the pairs no longer justified once `port_no` on `dpid` leaves
    /// `network_id`.
    ///
    /// A pair survives while `dpid` keeps another port on the network, or
    /// while the two hosts still share some other network. Returns the
    /// number of pairs removed.
    #[instrument(skip(self))]
    pub async fn on_port_removed(
        &self,
        network_id: &str,
        dpid: &str,
        port_no: u32,
    ) -> OvsNetResult<usize> {
        let bindings = self.store.list_port_bindings().await?;
        let remaining: Vec<&PortBinding> = bindings
            .iter()
            .filter(|b| !(b.dpid == dpid && b.port_no == port_no))
            .collect();

        if remaining
            .iter()
            .any(|b| b.dpid == dpid && b.network_id == network_id)
        {
            debug!("Host still has ports on this network");
            return Ok(0);
        }

        let local_networks: BTreeSet<&str> = remaining
            .iter()
            .filter(|b| b.dpid == dpid)
            .map(|b| b.network_id.as_str())
            .collect();
        let peers: BTreeSet<&str> = remaining
            .iter()
            .filter(|b| b.network_id == network_id && b.dpid != dpid)
            .map(|b| b.dpid.as_str())
            .collect();

        let mut removed = 0;
        for peer in peers {
            let still_shared = remaining
                .iter()
                .any(|b| b.dpid == peer && local_networks.contains(b.network_id.as_str()));
            if still_shared {
                continue;
            }
            if let Some(pair) = HostPair::new(dpid, peer) {
                if self.store.remove_tunnel_request(&pair).await? {
                    info!(pair = %pair, "Dropped tunnel request");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Converges the tunnel ports of `local_dpid` towards its requests.
    ///
    /// `tunnels` are the tunnel ports currently on the bridge. A request
    /// whose peer has no host node is skipped; a tunnel whose remote
    /// endpoint is not a required peer is deleted. Per-port failures are
    /// counted and left for the next pass. Fails only if the store cannot
    /// be read.
    #[instrument(skip(self, bridge, tunnels, controller), fields(tunnels = tunnels.len()))]
    pub async fn reconcile_local(
        &self,
        local_dpid: &str,
        local_ip: Ipv4Addr,
        bridge: &dyn BridgeDriver,
        tunnels: &[TunnelPort],
        controller: &dyn ControllerClient,
    ) -> OvsNetResult<MeshDelta> {
        let requests = self.store.list_tunnel_requests().await?;
        let hosts = self.store.list_host_nodes().await?;
        let address_of: HashMap<&str, Ipv4Addr> =
            hosts.iter().map(|h| (h.dpid.as_str(), h.address)).collect();

        let mut required: BTreeMap<Ipv4Addr, &str> = BTreeMap::new();
        for peer in requests.iter().filter_map(|p| p.peer_of(local_dpid)) {
            match address_of.get(peer) {
                Some(ip) if *ip != local_ip => {
                    required.insert(*ip, peer);
                }
                Some(_) => warn!(peer, "Peer claims the local tunnel endpoint, skipping"),
                None => debug!(peer, "Peer has no host node yet"),
            }
        }

        let mut delta = MeshDelta::default();
        let mut present = BTreeSet::new();

        for tunnel in tunnels {
            if required.contains_key(&tunnel.remote_ip) && present.insert(tunnel.remote_ip) {
                continue;
            }
            match self.remove_tunnel(local_dpid, bridge, controller, tunnel).await {
                Ok(()) => delta.removed.push(tunnel.port_name.clone()),
                Err(e) => {
                    warn!(port = %tunnel.port_name, error = %e, "Failed to remove tunnel port");
                    delta.errors += 1;
                }
            }
        }

        for (remote_ip, peer) in &required {
            if present.contains(remote_ip) {
                continue;
            }
            match self
                .add_tunnel(local_dpid, local_ip, *remote_ip, peer, bridge, controller)
                .await
            {
                Ok(name) => delta.added.push(name),
                Err(e) => {
                    warn!(peer, remote_ip = %remote_ip, error = %e, "Failed to add tunnel port");
                    delta.errors += 1;
                }
            }
        }

        if !delta.is_empty() {
            info!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                errors = delta.errors,
                "Converged tunnel ports"
            );
        }
        Ok(delta)
    }

    /// Takes over tunnel ports left on the bridge by a previous run.
    ///
    /// Ports whose remote endpoint resolves to a host node are re-announced
    /// to the controller; the rest are deleted.
    #[instrument(skip(self, bridge, tunnels, controller), fields(tunnels = tunnels.len()))]
    pub async fn adopt_tunnels(
        &self,
        local_dpid: &str,
        bridge: &dyn BridgeDriver,
        tunnels: &[TunnelPort],
        controller: &dyn ControllerClient,
    ) -> OvsNetResult<MeshDelta> {
        tolerate(
            "update_network",
            controller.update_network(NW_ID_VPORT_GRE).await,
        )?;

        let hosts = self.store.list_host_nodes().await?;
        let mut delta = MeshDelta::default();

        for tunnel in tunnels {
            let peer = hosts
                .iter()
                .find(|h| h.address == tunnel.remote_ip)
                .map(|h| h.dpid.as_str());

            let result = match peer {
                Some(peer) => self
                    .announce_tunnel(local_dpid, tunnel.ofport, peer, controller)
                    .await
                    .map(|()| delta.adopted.push(tunnel.port_name.clone())),
                None => {
                    debug!(port = %tunnel.port_name, "Tunnel peer is unknown, deleting");
                    self.remove_tunnel(local_dpid, bridge, controller, tunnel)
                        .await
                        .map(|()| delta.removed.push(tunnel.port_name.clone()))
                }
            };
            if let Err(e) = result {
                warn!(port = %tunnel.port_name, error = %e, "Failed to adopt tunnel port");
                delta.errors += 1;
            }
        }

        info!(
            adopted = delta.adopted.len(),
            removed = delta.removed.len(),
            "Adopted existing tunnel ports"
        );
        Ok(delta)
    }

    async fn announce_tunnel(
        &self,
        local_dpid: &str,
        ofport: u32,
        peer: &str,
        controller: &dyn ControllerClient,
    ) -> OvsNetResult<()> {
        tolerate(
            "update_port",
            controller
                .update_port(NW_ID_VPORT_GRE, local_dpid, ofport)
                .await,
        )?;
        tolerate(
            "update_remote_dpid",
            controller.update_remote_dpid(local_dpid, ofport, peer).await,
        )
    }

    async fn add_tunnel(
        &self,
        local_dpid: &str,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        peer: &str,
        bridge: &dyn BridgeDriver,
        controller: &dyn ControllerClient,
    ) -> OvsNetResult<String> {
        let name = gre_port_name(local_ip, remote_ip);
        bridge
            .add_tunnel_port(&name, local_ip, remote_ip, Some(FLOW_KEY))
            .await?;

        let ofport = match bridge.get_ofport(&name).await? {
            Some(ofport) => ofport,
            None => {
                return Err(OvsNetError::dataplane(
                    "add_tunnel_port",
                    format!("{} has no ofport", name),
                ))
            }
        };

        let announced = match tolerate(
            "create_port",
            controller
                .create_port(NW_ID_VPORT_GRE, local_dpid, ofport)
                .await,
        ) {
            Ok(()) => tolerate(
                "update_remote_dpid",
                controller.update_remote_dpid(local_dpid, ofport, peer).await,
            ),
            Err(e) => Err(e),
        };

        // An unannounced port would never be retried, so drop it.
        if let Err(e) = announced {
            if let Err(cleanup) = bridge.delete_port(&name).await {
                warn!(port = %name, error = %cleanup, "Failed to roll back tunnel port");
            }
            return Err(e);
        }

        info!(port = %name, peer, remote_ip = %remote_ip, ofport, "Added tunnel port");
        Ok(name)
    }

    async fn remove_tunnel(
        &self,
        local_dpid: &str,
        bridge: &dyn BridgeDriver,
        controller: &dyn ControllerClient,
        tunnel: &TunnelPort,
    ) -> OvsNetResult<()> {
        bridge.delete_port(&tunnel.port_name).await?;
        best_effort(
            "delete_port",
            controller
                .delete_port(NW_ID_VPORT_GRE, local_dpid, tunnel.ofport)
                .await,
        );
        best_effort(
            "delete_remote_dpid",
            controller.delete_remote_dpid(local_dpid, tunnel.ofport).await,
        );
        info!(port = %tunnel.port_name, remote_ip = %tunnel.remote_ip, "Removed tunnel port");
        Ok(())
    }
}
