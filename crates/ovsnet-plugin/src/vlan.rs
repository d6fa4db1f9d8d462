//! VLAN-backed network driver.

use async_trait::async_trait;
use ovsnet_alloc::VlanPool;
use ovsnet_common::{OvsNetError, OvsNetResult};
use ovsnet_store::{tables, NetStore, PortBinding, VlanBinding};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::driver::NetworkDriver;

/// Maps each network to a VLAN tag and persists the mapping, so agents can
/// resolve tags from the store.
pub struct VlanNetworkDriver {
    store: Arc<dyn NetStore>,
    pool: VlanPool,
}

impl VlanNetworkDriver {
    /// Creates a driver whose pool is seeded from persisted bindings.
    pub async fn load(store: Arc<dyn NetStore>) -> OvsNetResult<Self> {
        let bindings = store.list_vlan_bindings().await?;
        let pool = VlanPool::from_bindings(&bindings);
        info!(bound = pool.bound_count(), "Loaded VLAN bindings");
        Ok(Self { store, pool })
    }

    /// Tag bound to `network_id`.
    pub fn tag_of(&self, network_id: &str) -> Option<u16> {
        self.pool.tag_of(network_id)
    }

    pub fn pool(&self) -> &VlanPool {
        &self.pool
    }
}

#[async_trait]
impl NetworkDriver for VlanNetworkDriver {
    fn name(&self) -> &str {
        "vlan"
    }

    async fn sync_all(&mut self) -> OvsNetResult<()> {
        let bindings = self.store.list_vlan_bindings().await?;
        self.pool = VlanPool::from_bindings(&bindings);
        info!(bound = self.pool.bound_count(), "Resynchronized VLAN pool");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_network(&mut self, network_id: &str) -> OvsNetResult<()> {
        let tag = self.pool.acquire(network_id)?;
        let binding = VlanBinding {
            vlan_tag: tag,
            network_id: network_id.to_string(),
        };
        if let Err(e) = self.store.put_vlan_binding(&binding).await {
            self.pool.release(network_id);
            return Err(e);
        }
        info!(vlan_tag = tag, "Created network");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_network(&mut self, network_id: &str) -> OvsNetResult<()> {
        self.store.delete_vlan_binding(network_id).await?;
        if let Some(tag) = self.pool.release(network_id) {
            info!(vlan_tag = tag, "Deleted network");
        }
        Ok(())
    }

    #[instrument(skip(self, binding), fields(port_id = %binding.port_id, network_id = %binding.network_id))]
    async fn bind_port(&mut self, binding: &PortBinding) -> OvsNetResult<()> {
        if self.pool.tag_of(&binding.network_id).is_none() {
            return Err(OvsNetError::not_found(
                tables::VLAN_BINDING,
                binding.network_id.clone(),
            ));
        }
        self.store.put_port_binding(binding).await?;
        debug!("Bound port");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unbind_port(&mut self, port_id: &str) -> OvsNetResult<()> {
        if !self.store.delete_port_binding(port_id).await? {
            warn!("Unbinding a port that has no binding");
        }
        Ok(())
    }
}
