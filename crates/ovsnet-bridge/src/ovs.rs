//! `BridgeDriver` over the Open vSwitch command line tools.

use async_trait::async_trait;
use ovsnet_common::config::OvsNetConfig;
use ovsnet_common::shell;
use ovsnet_common::{OvsNetError, OvsNetResult};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::instrument;

use crate::commands::*;
use crate::driver::BridgeDriver;
use crate::ovsdb;

/// Drives one OVS bridge through `ovs-vsctl` and `ovs-ofctl`.
pub struct OvsBridge {
    bridge: String,
    root_helper: String,
    timeout: Duration,

    /// Mock mode for testing
    #[cfg(test)]
    mock_mode: bool,

    /// Captured commands in mock mode
    #[cfg(test)]
    captured_commands: std::sync::Mutex<Vec<String>>,
}

impl OvsBridge {
    pub fn new(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            root_helper: String::new(),
            timeout: Duration::from_secs(2),
            #[cfg(test)]
            mock_mode: false,
            #[cfg(test)]
            captured_commands: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Builds the bridge described by the `[bridge]` section.
    pub fn from_config(config: &OvsNetConfig) -> Self {
        Self::new(config.bridge.integration_bridge.clone())
            .with_root_helper(config.bridge.root_helper.clone())
            .with_timeout(config.vsctl_timeout())
    }

    /// Sets the privilege helper prepended to every command.
    pub fn with_root_helper(mut self, root_helper: impl Into<String>) -> Self {
        self.root_helper = root_helper.into();
        self
    }

    /// Sets the `ovs-vsctl --timeout` value; commands get one extra second
    /// of wall-clock time before being killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_secs(1));
        self
    }

    /// Enables mock mode for testing
    #[cfg(test)]
    pub fn with_mock_mode(mut self) -> Self {
        self.mock_mode = true;
        self
    }

    /// Gets captured commands (for testing)
    #[cfg(test)]
    pub fn captured_commands(&self) -> Vec<String> {
        self.captured_commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Execute a command (with mock mode support)
    async fn run(&self, operation: &str, cmd: &str) -> OvsNetResult<String> {
        let cmd = shell::with_root_helper(&self.root_helper, cmd);

        #[cfg(test)]
        if self.mock_mode {
            if let Ok(mut captured) = self.captured_commands.lock() {
                captured.push(cmd.clone());
            }
            tracing::debug!("Mock exec: {}", cmd);
            return Ok(String::new());
        }

        shell::exec_with_timeout(&cmd, self.timeout + Duration::from_secs(1))
            .await
            .map_err(|e| match e {
                OvsNetError::DataplaneUnavailable { .. } => e,
                other => OvsNetError::dataplane(operation, other.to_string()),
            })
    }

    async fn get_column(&self, table: &str, record: &str, column: &str) -> OvsNetResult<String> {
        let cmd = build_get_column_cmd(self.timeout_secs(), table, record, column);
        self.run("get", &cmd).await
    }
}

#[async_trait]
impl BridgeDriver for OvsBridge {
    fn bridge_name(&self) -> &str {
        &self.bridge
    }

    async fn list_ports(&self) -> OvsNetResult<Vec<String>> {
        let cmd = build_list_ports_cmd(self.timeout_secs(), &self.bridge);
        let out = self.run("list_ports", &cmd).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn get_port_attr(&self, port: &str, attr: &str) -> OvsNetResult<String> {
        let raw = self.get_column("Interface", port, attr).await?;
        Ok(ovsdb::unquote(&raw))
    }

    async fn get_port_external_ids(&self, port: &str) -> OvsNetResult<HashMap<String, String>> {
        let raw = self.get_column("Interface", port, "external_ids").await?;
        Ok(ovsdb::parse_map(&raw))
    }

    async fn get_port_options(&self, port: &str) -> OvsNetResult<HashMap<String, String>> {
        let raw = self.get_column("Interface", port, "options").await?;
        Ok(ovsdb::parse_map(&raw))
    }

    #[instrument(skip(self))]
    async fn set_port_tag(&self, port: &str, tag: u16) -> OvsNetResult<()> {
        let cmd = build_set_port_tag_cmd(self.timeout_secs(), port, tag);
        self.run("set_port_tag", &cmd).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_port_tag(&self, port: &str) -> OvsNetResult<()> {
        let cmd = build_clear_port_tag_cmd(self.timeout_secs(), port);
        self.run("clear_port_tag", &cmd).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_flow(
        &self,
        priority: u16,
        matches: Option<&str>,
        actions: &str,
    ) -> OvsNetResult<()> {
        let cmd = build_add_flow_cmd(&self.bridge, priority, matches, actions);
        self.run("add_flow", &cmd).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_flows(&self, matches: Option<&str>) -> OvsNetResult<()> {
        let cmd = build_delete_flows_cmd(&self.bridge, matches);
        self.run("delete_flows", &cmd).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_tunnel_port(
        &self,
        name: &str,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        key: Option<&str>,
    ) -> OvsNetResult<()> {
        let cmd = build_add_tunnel_port_cmd(
            self.timeout_secs(),
            &self.bridge,
            name,
            local_ip,
            remote_ip,
            key,
        );
        self.run("add_tunnel_port", &cmd).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_port(&self, name: &str) -> OvsNetResult<()> {
        let cmd = build_delete_port_cmd(self.timeout_secs(), &self.bridge, name);
        self.run("delete_port", &cmd).await?;
        Ok(())
    }

    async fn get_datapath_id(&self) -> OvsNetResult<String> {
        let cmd = build_datapath_id_cmd(self.timeout_secs(), &self.bridge);
        let raw = self.run("get_datapath_id", &cmd).await?;
        Ok(ovsdb::unquote(&raw))
    }

    #[instrument(skip(self))]
    async fn set_controller(&self, targets: &[String]) -> OvsNetResult<()> {
        let cmd = build_set_controller_cmd(self.timeout_secs(), &self.bridge, targets);
        self.run("set_controller", &cmd).await?;
        Ok(())
    }
}
