//! The bridge driver interface consumed by the agent.

use async_trait::async_trait;
use ovsnet_common::{defaults, OvsNetResult};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Primitive operations against the local switch.
///
/// Every call may fail with `DataplaneUnavailable` (including on timeout).
#[async_trait]
pub trait BridgeDriver: Send + Sync {
    /// Name of the managed bridge.
    fn bridge_name(&self) -> &str;

    async fn list_ports(&self) -> OvsNetResult<Vec<String>>;

    /// Reads one scalar `Interface` column, unquoted.
    async fn get_port_attr(&self, port: &str, attr: &str) -> OvsNetResult<String>;

    async fn get_port_external_ids(&self, port: &str) -> OvsNetResult<HashMap<String, String>>;

    async fn get_port_options(&self, port: &str) -> OvsNetResult<HashMap<String, String>>;

    async fn set_port_tag(&self, port: &str, tag: u16) -> OvsNetResult<()>;

    async fn clear_port_tag(&self, port: &str) -> OvsNetResult<()>;

    async fn add_flow(&self, priority: u16, matches: Option<&str>, actions: &str)
        -> OvsNetResult<()>;

    /// Removes flows matching `matches`, or every flow when `None`.
    async fn delete_flows(&self, matches: Option<&str>) -> OvsNetResult<()>;

    async fn add_tunnel_port(
        &self,
        name: &str,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        key: Option<&str>,
    ) -> OvsNetResult<()>;

    /// Removes a port; absent ports are not an error.
    async fn delete_port(&self, name: &str) -> OvsNetResult<()>;

    async fn get_datapath_id(&self) -> OvsNetResult<String>;

    /// Points the bridge at the given controller addresses.
    async fn set_controller(&self, targets: &[String]) -> OvsNetResult<()>;

    /// OpenFlow port number of `port`, `None` while unassigned.
    async fn get_ofport(&self, port: &str) -> OvsNetResult<Option<u32>> {
        let raw = self.get_port_attr(port, "ofport").await?;
        Ok(crate::ovsdb::parse_ofport(&raw))
    }

    /// Drops every flow and installs plain L2 learning.
    async fn reset_flows(&self) -> OvsNetResult<()> {
        self.delete_flows(None).await?;
        self.add_flow(defaults::NORMAL_FLOW_PRIORITY, None, "normal")
            .await
    }
}
