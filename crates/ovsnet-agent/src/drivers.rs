//! Agent flavors.
//!
//! The reconciliation loop is the same for every deployment; what differs
//! is how a port is isolated, bound and announced. [`AgentDriver`] carries
//! those hooks and [`build_driver`] picks the flavor from the configured
//! [`AgentMode`].

use async_trait::async_trait;
use ovsnet_bridge::commands::{controller_target, in_port_match};
use ovsnet_bridge::{resolve_tunnel_ip, BridgeDriver, BridgeView, ExternalPort, VifPort};
use ovsnet_common::{
    defaults, AgentMode, OvsNetConfig, OvsNetError, OvsNetResult, NW_ID_EXTERNAL,
};
use ovsnet_controller::{ignore_not_found, tolerate, ControllerClient, RestController};
use ovsnet_mesh::TunnelMeshPlanner;
use ovsnet_store::{register_host, tables, NetStore, PortBinding, ServerKind};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Flavor-specific hooks driven by the reconciliation loop.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    fn mode(&self) -> AgentMode;

    /// Prepares the bridge once, before the first tick.
    async fn setup(&mut self, bridge: &dyn BridgeDriver, dpid: &str) -> OvsNetResult<()>;

    /// Cuts a port with no resolved network off from every network.
    async fn isolate(&self, bridge: &dyn BridgeDriver, port: &VifPort) -> OvsNetResult<()> {
        isolate_port(bridge, port, defaults::DEAD_VLAN_TAG).await
    }

    /// Puts a port on its network. `vlan_tag` is the network's VLAN, if
    /// one is recorded.
    async fn bind(
        &self,
        bridge: &dyn BridgeDriver,
        port: &VifPort,
        binding: &PortBinding,
        vlan_tag: Option<u16>,
    ) -> OvsNetResult<()>;

    /// Takes a port off `network_id`.
    async fn unbind(
        &self,
        bridge: &dyn BridgeDriver,
        port: &VifPort,
        network_id: &str,
    ) -> OvsNetResult<()>;

    /// Called once for every uplink port that appears on the bridge.
    async fn external_port_added(&self, _port: &ExternalPort) -> OvsNetResult<()> {
        Ok(())
    }

    /// Called after the port phase of every tick that read the bridge.
    async fn after_tick(&mut self, _bridge: &dyn BridgeDriver, _view: &BridgeView) -> OvsNetResult<()> {
        Ok(())
    }
}

/// Dead VLAN plus a drop flow for everything entering on the port.
pub async fn isolate_port(bridge: &dyn BridgeDriver, port: &VifPort, dead_vlan_tag: u16) -> OvsNetResult<()> {
    bridge.set_port_tag(&port.port_name, dead_vlan_tag).await?;
    bridge
        .add_flow(
            defaults::ISOLATE_FLOW_PRIORITY,
            Some(&in_port_match(port.ofport)),
            "drop",
        )
        .await
}

async fn clear_isolation(bridge: &dyn BridgeDriver, port: &VifPort) -> OvsNetResult<()> {
    bridge.delete_flows(Some(&in_port_match(port.ofport))).await
}

/// Local VLAN tagging, no controller.
#[derive(Debug, Clone)]
pub struct VlanAgentDriver {
    dead_vlan_tag: u16,
}

impl VlanAgentDriver {
    pub fn new(dead_vlan_tag: u16) -> Self {
        Self { dead_vlan_tag }
    }
}

impl Default for VlanAgentDriver {
    fn default() -> Self {
        Self::new(defaults::DEAD_VLAN_TAG)
    }
}

#[async_trait]
impl AgentDriver for VlanAgentDriver {
    fn mode(&self) -> AgentMode {
        AgentMode::Vlan
    }

    async fn setup(&mut self, bridge: &dyn BridgeDriver, _dpid: &str) -> OvsNetResult<()> {
        bridge.reset_flows().await?;
        info!(bridge = bridge.bridge_name(), "Installed normal forwarding");
        Ok(())
    }

    async fn isolate(&self, bridge: &dyn BridgeDriver, port: &VifPort) -> OvsNetResult<()> {
        isolate_port(bridge, port, self.dead_vlan_tag).await
    }

    async fn bind(
        &self,
        bridge: &dyn BridgeDriver,
        port: &VifPort,
        binding: &PortBinding,
        vlan_tag: Option<u16>,
    ) -> OvsNetResult<()> {
        // A port without a tag to go to stays isolated.
        let tag = vlan_tag.ok_or_else(|| {
            OvsNetError::not_found(tables::VLAN_BINDING, binding.network_id.clone())
        })?;
        bridge.set_port_tag(&port.port_name, tag).await?;
        clear_isolation(bridge, port).await
    }

    async fn unbind(
        &self,
        bridge: &dyn BridgeDriver,
        port: &VifPort,
        _network_id: &str,
    ) -> OvsNetResult<()> {
        bridge.clear_port_tag(&port.port_name).await
    }
}

/// Controller addresses the agent talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerAddresses {
    pub openflow: String,
    pub rest_api: String,
}

impl ControllerAddresses {
    /// Takes each address from the configuration, else from the servers
    /// the plugin published in the store.
    ///
    /// A missing address is a configuration error.
    pub async fn resolve(config: &OvsNetConfig, store: &dyn NetStore) -> OvsNetResult<Self> {
        let mut openflow = config.controller.openflow_controller.clone();
        let mut rest_api = config.controller.rest_api.clone();

        if openflow.is_none() || rest_api.is_none() {
            for server in store.list_controller_servers().await? {
                let slot = match server.kind {
                    ServerKind::Openflow => &mut openflow,
                    ServerKind::RestApi => &mut rest_api,
                };
                if slot.is_none() {
                    debug!(kind = server.kind.as_str(), address = %server.address, "Using published controller server");
                    *slot = Some(server.address);
                }
            }
        }

        let openflow = openflow.ok_or_else(|| {
            OvsNetError::invalid_config(
                "controller.openflow_controller",
                "no OpenFlow controller configured or published",
            )
        })?;
        let rest_api = rest_api.ok_or_else(|| {
            OvsNetError::invalid_config(
                "controller.rest_api",
                "no controller REST API configured or published",
            )
        })?;
        Ok(Self { openflow, rest_api })
    }
}

/// The bridge is programmed by an OpenFlow controller; the agent tells it
/// which port is where.
pub struct ControllerAgentDriver {
    openflow: String,
    controller: Arc<dyn ControllerClient>,
    dead_vlan_tag: u16,
    dpid: String,
}

impl ControllerAgentDriver {
    pub fn new(openflow: impl Into<String>, controller: Arc<dyn ControllerClient>) -> Self {
        Self {
            openflow: openflow.into(),
            controller,
            dead_vlan_tag: defaults::DEAD_VLAN_TAG,
            dpid: String::new(),
        }
    }

    pub fn with_dead_vlan_tag(mut self, tag: u16) -> Self {
        self.dead_vlan_tag = tag;
        self
    }

    pub fn controller(&self) -> &dyn ControllerClient {
        self.controller.as_ref()
    }

    pub fn dpid(&self) -> &str {
        &self.dpid
    }
}

#[async_trait]
impl AgentDriver for ControllerAgentDriver {
    fn mode(&self) -> AgentMode {
        AgentMode::Controller
    }

    #[instrument(skip(self, bridge))]
    async fn setup(&mut self, bridge: &dyn BridgeDriver, dpid: &str) -> OvsNetResult<()> {
        self.dpid = dpid.to_string();
        bridge
            .set_controller(&[controller_target(&self.openflow)])
            .await?;
        tolerate(
            "update_network",
            self.controller.update_network(NW_ID_EXTERNAL).await,
        )?;
        info!(openflow = %self.openflow, "Bridge handed to controller");
        Ok(())
    }

    async fn isolate(&self, bridge: &dyn BridgeDriver, port: &VifPort) -> OvsNetResult<()> {
        isolate_port(bridge, port, self.dead_vlan_tag).await
    }

    async fn bind(
        &self,
        bridge: &dyn BridgeDriver,
        port: &VifPort,
        binding: &PortBinding,
        _vlan_tag: Option<u16>,
    ) -> OvsNetResult<()> {
        bridge.clear_port_tag(&port.port_name).await?;
        clear_isolation(bridge, port).await?;

        let network_id = binding.network_id.as_str();
        tolerate(
            "update_port",
            self.controller
                .update_port(network_id, &self.dpid, port.ofport)
                .await,
        )?;
        tolerate(
            "update_network",
            self.controller.update_network(network_id).await,
        )?;
        tolerate(
            "update_mac",
            self.controller
                .update_mac(network_id, &self.dpid, port.ofport, &port.mac)
                .await,
        )
    }

    async fn unbind(
        &self,
        _bridge: &dyn BridgeDriver,
        port: &VifPort,
        network_id: &str,
    ) -> OvsNetResult<()> {
        ignore_not_found(
            "delete_port",
            self.controller
                .delete_port(network_id, &self.dpid, port.ofport)
                .await,
        )
    }

    async fn external_port_added(&self, port: &ExternalPort) -> OvsNetResult<()> {
        tolerate(
            "update_port",
            self.controller
                .update_port(NW_ID_EXTERNAL, &self.dpid, port.ofport)
                .await,
        )?;
        debug!(port = %port.port_name, ofport = port.ofport, "Announced external port");
        Ok(())
    }
}

/// Controller flavor plus a GRE full mesh to every host sharing a network.
pub struct MeshAgentDriver {
    inner: ControllerAgentDriver,
    store: Arc<dyn NetStore>,
    planner: TunnelMeshPlanner,
    local_ip: Ipv4Addr,
}

impl MeshAgentDriver {
    pub fn new(inner: ControllerAgentDriver, store: Arc<dyn NetStore>, local_ip: Ipv4Addr) -> Self {
        Self {
            planner: TunnelMeshPlanner::new(store.clone()),
            inner,
            store,
            local_ip,
        }
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }
}

#[async_trait]
impl AgentDriver for MeshAgentDriver {
    fn mode(&self) -> AgentMode {
        AgentMode::TunnelMesh
    }

    #[instrument(skip(self, bridge), fields(local_ip = %self.local_ip))]
    async fn setup(&mut self, bridge: &dyn BridgeDriver, dpid: &str) -> OvsNetResult<()> {
        self.inner.setup(bridge, dpid).await?;
        register_host(self.store.as_ref(), dpid, self.local_ip).await?;

        let view = BridgeView::snapshot(bridge).await?;
        let delta = self
            .planner
            .adopt_tunnels(dpid, bridge, &view.tunnel_ports, self.inner.controller())
            .await?;
        if delta.errors > 0 {
            warn!(errors = delta.errors, "Some tunnel ports could not be adopted");
        }
        Ok(())
    }

    async fn isolate(&self, bridge: &dyn BridgeDriver, port: &VifPort) -> OvsNetResult<()> {
        self.inner.isolate(bridge, port).await
    }

    async fn bind(
        &self,
        bridge: &dyn BridgeDriver,
        port: &VifPort,
        binding: &PortBinding,
        vlan_tag: Option<u16>,
    ) -> OvsNetResult<()> {
        self.inner.bind(bridge, port, binding, vlan_tag).await
    }

    async fn unbind(
        &self,
        bridge: &dyn BridgeDriver,
        port: &VifPort,
        network_id: &str,
    ) -> OvsNetResult<()> {
        self.inner.unbind(bridge, port, network_id).await
    }

    async fn external_port_added(&self, port: &ExternalPort) -> OvsNetResult<()> {
        self.inner.external_port_added(port).await
    }

    async fn after_tick(&mut self, bridge: &dyn BridgeDriver, view: &BridgeView) -> OvsNetResult<()> {
        let delta = self
            .planner
            .reconcile_local(
                self.inner.dpid(),
                self.local_ip,
                bridge,
                &view.tunnel_ports,
                self.inner.controller(),
            )
            .await?;
        if delta.errors > 0 {
            return Err(OvsNetError::dataplane(
                "reconcile_tunnels",
                format!("{} tunnel ports left for the next pass", delta.errors),
            ));
        }
        Ok(())
    }
}

/// Builds the flavor selected by `config.agent.mode`.
///
/// Controller addresses and the tunnel endpoint are resolved here, so a
/// misconfiguration fails before the loop starts.
pub async fn build_driver(
    config: &OvsNetConfig,
    store: Arc<dyn NetStore>,
) -> OvsNetResult<Box<dyn AgentDriver>> {
    let dead_vlan_tag = config.agent.dead_vlan_tag;
    match config.agent.mode {
        AgentMode::Vlan => Ok(Box::new(VlanAgentDriver::new(dead_vlan_tag))),
        AgentMode::Controller | AgentMode::TunnelMesh => {
            let addresses = ControllerAddresses::resolve(config, store.as_ref()).await?;
            let client = RestController::new(&addresses.rest_api, config.request_timeout())?;
            let inner = ControllerAgentDriver::new(addresses.openflow, Arc::new(client))
                .with_dead_vlan_tag(dead_vlan_tag);

            if config.agent.mode == AgentMode::Controller {
                return Ok(Box::new(inner));
            }
            let local_ip = resolve_tunnel_ip(config).await?;
            Ok(Box::new(MeshAgentDriver::new(inner, store, local_ip)))
        }
    }
}
