//! Tunnel-key backed network driver.
//!
//! Networks get a globally unique tunnel key; ports feed the tunnel mesh;
//! the controller hears about both.

use async_trait::async_trait;
use ovsnet_alloc::{KeyRange, TunnelKeyAllocator};
use ovsnet_common::config::ControllerConfig;
use ovsnet_common::{is_reserved_network, OvsNetError, OvsNetResult};
use ovsnet_controller::{ignore_not_found, tolerate, ControllerClient};
use ovsnet_mesh::TunnelMeshPlanner;
use ovsnet_store::{ControllerServer, NetStore, PortBinding, ServerKind};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::driver::NetworkDriver;

pub struct TunnelNetworkDriver {
    store: Arc<dyn NetStore>,
    keys: TunnelKeyAllocator,
    planner: TunnelMeshPlanner,
    controller: Arc<dyn ControllerClient>,
}

impl TunnelNetworkDriver {
    pub fn new(
        store: Arc<dyn NetStore>,
        range: KeyRange,
        controller: Arc<dyn ControllerClient>,
    ) -> Self {
        Self {
            keys: TunnelKeyAllocator::new(store.clone(), range),
            planner: TunnelMeshPlanner::new(store.clone()),
            store,
            controller,
        }
    }

    pub fn planner(&self) -> &TunnelMeshPlanner {
        &self.planner
    }

    /// Tunnel key of `network_id`.
    pub async fn tunnel_key(&self, network_id: &str) -> OvsNetResult<u32> {
        self.keys.get(network_id).await
    }

    /// Publishes the controller addresses so agents can find them.
    #[instrument(skip(self, config))]
    pub async fn publish_controller_servers(&self, config: &ControllerConfig) -> OvsNetResult<()> {
        let servers = [
            (ServerKind::Openflow, config.openflow_controller.as_ref()),
            (ServerKind::RestApi, config.rest_api.as_ref()),
        ];
        for (kind, address) in servers {
            if let Some(address) = address {
                self.store
                    .set_controller_server(&ControllerServer {
                        kind,
                        address: address.clone(),
                    })
                    .await?;
                info!(kind = kind.as_str(), address = %address, "Published controller server");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkDriver for TunnelNetworkDriver {
    fn name(&self) -> &str {
        "tunnel"
    }

    #[instrument(skip(self))]
    async fn sync_all(&mut self) -> OvsNetResult<()> {
        let keys = self.store.list_tunnel_keys().await?;
        for key in &keys {
            tolerate(
                "create_network",
                self.controller.create_network(&key.network_id).await,
            )?;
            tolerate(
                "create_tunnel_key",
                self.controller
                    .create_tunnel_key(&key.network_id, key.tunnel_key)
                    .await,
            )?;
        }

        let bindings = self.store.list_port_bindings().await?;
        for b in &bindings {
            tolerate(
                "create_port",
                self.controller
                    .create_port(&b.network_id, &b.dpid, b.port_no)
                    .await,
            )?;
            tolerate(
                "update_mac",
                self.controller
                    .update_mac(&b.network_id, &b.dpid, b.port_no, &b.mac)
                    .await,
            )?;
        }

        let pairs = self.planner.rebuild().await?;
        info!(
            networks = keys.len(),
            ports = bindings.len(),
            tunnels = pairs.len(),
            "Synchronized controller state"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_network(&mut self, network_id: &str) -> OvsNetResult<()> {
        if is_reserved_network(network_id) {
            return Err(OvsNetError::conflict(format!(
                "reserved network id {}",
                network_id
            )));
        }
        let key = self.keys.allocate(network_id).await?;
        tolerate(
            "create_network",
            self.controller.create_network(network_id).await,
        )?;
        tolerate(
            "create_tunnel_key",
            self.controller.create_tunnel_key(network_id, key).await,
        )?;
        info!(tunnel_key = key, "Created network");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_network(&mut self, network_id: &str) -> OvsNetResult<()> {
        ignore_not_found(
            "delete_network",
            self.controller.delete_network(network_id).await,
        )?;
        ignore_not_found(
            "delete_tunnel_key",
            self.controller.delete_tunnel_key(network_id).await,
        )?;
        self.keys.delete(network_id).await?;
        info!("Deleted network");
        Ok(())
    }

    #[instrument(skip(self, binding), fields(port_id = %binding.port_id, network_id = %binding.network_id))]
    async fn bind_port(&mut self, binding: &PortBinding) -> OvsNetResult<()> {
        let previous = self.store.get_port_binding(&binding.port_id).await?;
        self.store.put_port_binding(binding).await?;

        // A re-bind to another network or port leaves the old one first.
        if let Some(prev) = previous.filter(|p| {
            (&p.network_id, &p.dpid, p.port_no)
                != (&binding.network_id, &binding.dpid, binding.port_no)
        }) {
            self.planner
                .on_port_removed(&prev.network_id, &prev.dpid, prev.port_no)
                .await?;
            ignore_not_found(
                "delete_port",
                self.controller
                    .delete_port(&prev.network_id, &prev.dpid, prev.port_no)
                    .await,
            )?;
            debug!(network_id = %prev.network_id, dpid = %prev.dpid, port_no = prev.port_no, "Left previous binding");
        }

        self.planner
            .on_port_added(&binding.network_id, &binding.dpid, binding.port_no)
            .await?;
        tolerate(
            "create_port",
            self.controller
                .create_port(&binding.network_id, &binding.dpid, binding.port_no)
                .await,
        )?;
        tolerate(
            "update_mac",
            self.controller
                .update_mac(
                    &binding.network_id,
                    &binding.dpid,
                    binding.port_no,
                    &binding.mac,
                )
                .await,
        )?;
        debug!(dpid = %binding.dpid, port_no = binding.port_no, "Bound port");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unbind_port(&mut self, port_id: &str) -> OvsNetResult<()> {
        let binding = match self.store.get_port_binding(port_id).await? {
            Some(binding) => binding,
            None => {
                debug!("Port has no binding");
                return Ok(());
            }
        };

        self.store.delete_port_binding(port_id).await?;
        self.planner
            .on_port_removed(&binding.network_id, &binding.dpid, binding.port_no)
            .await?;
        ignore_not_found(
            "delete_port",
            self.controller
                .delete_port(&binding.network_id, &binding.dpid, binding.port_no)
                .await,
        )?;
        debug!(dpid = %binding.dpid, port_no = binding.port_no, "Unbound port");
        Ok(())
    }
}
