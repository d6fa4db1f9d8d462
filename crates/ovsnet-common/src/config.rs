//! Configuration file support.
//!
//! Loads and validates the agent/plugin configuration from a TOML file.
//! Default location: /etc/ovsnet/agent.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::{OvsNetError, OvsNetResult};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ovsnet/agent.toml";

/// Which capability set the agent runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentMode {
    /// Local VLAN tagging with dead-VLAN isolation, no controller.
    Vlan,
    /// OpenFlow controller programs the bridge; agent notifies it over REST.
    Controller,
    /// Controller mode plus a GRE full mesh between hosts.
    TunnelMesh,
}

impl AgentMode {
    /// Returns the mode name as used in the configuration file.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Vlan => "vlan",
            AgentMode::Controller => "controller",
            AgentMode::TunnelMesh => "tunnel-mesh",
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = OvsNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vlan" => Ok(AgentMode::Vlan),
            "controller" => Ok(AgentMode::Controller),
            "tunnel-mesh" => Ok(AgentMode::TunnelMesh),
            other => Err(OvsNetError::invalid_config(
                "agent.mode",
                format!("unknown mode '{}'", other),
            )),
        }
    }
}

/// Width of the tunnel key field of the encapsulation in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyWidth {
    /// 12-bit, VLAN-style keys.
    Vlan,
    /// 24-bit keys (GRE/VXLAN style).
    Gre24,
    /// Full 32-bit GRE keys.
    Gre32,
}

impl KeyWidth {
    /// Largest key representable at this width.
    pub fn max_key(&self) -> u32 {
        match self {
            KeyWidth::Vlan => 0x0fff,
            KeyWidth::Gre24 => 0x00ff_ffff,
            KeyWidth::Gre32 => u32::MAX,
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Integration bridge name
    #[serde(default = "default_integration_bridge")]
    pub integration_bridge: String,

    /// Command prefix used to gain privileges (empty for none)
    #[serde(default = "default_root_helper")]
    pub root_helper: String,

    /// ovs-vsctl timeout in seconds
    #[serde(default = "default_vsctl_timeout")]
    pub vsctl_timeout_secs: u64,
}

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Capability set
    #[serde(default = "default_mode")]
    pub mode: AgentMode,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Sentinel VLAN used to isolate unbound ports
    #[serde(default = "default_dead_vlan_tag")]
    pub dead_vlan_tag: u16,

    /// Local tunnel endpoint; detected from the routing table when absent
    #[serde(default)]
    pub tunnel_ip: Option<Ipv4Addr>,

    /// Interface whose address is the tunnel endpoint
    #[serde(default)]
    pub physical_interface: Option<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number
    #[serde(default)]
    pub db_number: u32,
}

/// Tunnel key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Encapsulation key width
    #[serde(default = "default_key_width")]
    pub key_width: KeyWidth,

    /// Reserved floor; issued keys are strictly above it
    #[serde(default)]
    pub key_min: u32,

    /// Explicit upper bound, defaults to the key width maximum
    #[serde(default)]
    pub key_max: Option<u32>,
}

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// OpenFlow controller address (`host:port`)
    #[serde(default)]
    pub openflow_controller: Option<String>,

    /// Controller REST API address (`host:port`)
    #[serde(default)]
    pub rest_api: Option<String>,

    /// REST request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OvsNetConfig {
    /// Bridge configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentSection,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Tunnel key configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Controller configuration
    #[serde(default)]
    pub controller: ControllerConfig,
}

fn default_integration_bridge() -> String {
    "br-int".to_string()
}

fn default_root_helper() -> String {
    "sudo".to_string()
}

fn default_vsctl_timeout() -> u64 {
    2
}

fn default_mode() -> AgentMode {
    AgentMode::Vlan
}

fn default_poll_interval() -> u64 {
    2
}

fn default_dead_vlan_tag() -> u16 {
    4095
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_key_width() -> KeyWidth {
    KeyWidth::Vlan
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            integration_bridge: default_integration_bridge(),
            root_helper: default_root_helper(),
            vsctl_timeout_secs: default_vsctl_timeout(),
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            poll_interval_secs: default_poll_interval(),
            dead_vlan_tag: default_dead_vlan_tag(),
            tunnel_ip: None,
            physical_interface: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            db_number: 0,
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            key_width: default_key_width(),
            key_min: 0,
            key_max: None,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            openflow_controller: None,
            rest_api: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl TunnelConfig {
    /// Effective upper bound for issued keys.
    pub fn effective_key_max(&self) -> u32 {
        self.key_max.unwrap_or_else(|| self.key_width.max_key())
    }
}

impl OvsNetConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> OvsNetResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| match e {
                OvsNetError::InvalidConfig { message, .. } => {
                    OvsNetError::invalid_config(path.display().to_string(), message)
                }
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(OvsNetError::invalid_config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml(content: &str) -> OvsNetResult<Self> {
        toml::from_str(content)
            .map_err(|e| OvsNetError::invalid_config("toml", format!("parse error: {}", e)))
    }

    /// Poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.agent.poll_interval_secs)
    }

    /// ovs-vsctl timeout as Duration
    pub fn vsctl_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.vsctl_timeout_secs)
    }

    /// Controller request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.controller.request_timeout_secs)
    }

    /// Redis connection URL
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.database.redis_host, self.database.redis_port, self.database.db_number
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> OvsNetResult<()> {
        if self.bridge.integration_bridge.is_empty() {
            return Err(OvsNetError::invalid_config(
                "bridge.integration_bridge",
                "must not be empty",
            ));
        }

        if self.agent.poll_interval_secs == 0 {
            return Err(OvsNetError::invalid_config(
                "agent.poll_interval_secs",
                "must be > 0",
            ));
        }

        if self.agent.dead_vlan_tag == 0 || self.agent.dead_vlan_tag > 4095 {
            return Err(OvsNetError::invalid_config(
                "agent.dead_vlan_tag",
                "must be in 1-4095",
            ));
        }

        if self.database.redis_port == 0 {
            return Err(OvsNetError::invalid_config(
                "database.redis_port",
                "must be > 0",
            ));
        }

        let key_max = self.tunnel.effective_key_max();
        if key_max > self.tunnel.key_width.max_key() {
            return Err(OvsNetError::invalid_config(
                "tunnel.key_max",
                format!(
                    "{} exceeds the {:?} key width",
                    key_max, self.tunnel.key_width
                ),
            ));
        }
        if self.tunnel.key_min >= key_max {
            return Err(OvsNetError::invalid_config(
                "tunnel.key_min",
                format!("must be below key_max ({})", key_max),
            ));
        }

        if self.agent.mode != AgentMode::Vlan {
            for (field, value) in [
                ("controller.openflow_controller", &self.controller.openflow_controller),
                ("controller.rest_api", &self.controller.rest_api),
            ] {
                if matches!(value, Some(v) if v.trim().is_empty()) {
                    return Err(OvsNetError::invalid_config(field, "must not be empty"));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OvsNetConfig::default();
        assert_eq!(config.bridge.integration_bridge, "br-int");
        assert_eq!(config.agent.mode, AgentMode::Vlan);
        assert_eq!(config.agent.dead_vlan_tag, 4095);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.tunnel.effective_key_max(), 4095);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_key_width_max() {
        assert_eq!(KeyWidth::Vlan.max_key(), 4095);
        assert_eq!(KeyWidth::Gre24.max_key(), 0xffffff);
        assert_eq!(KeyWidth::Gre32.max_key(), 0xffff_ffff);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[agent]
mode = "tunnel-mesh"
tunnel_ip = "192.168.0.10"

[tunnel]
key_width = "gre24"

[controller]
openflow_controller = "10.0.0.1:6633"
rest_api = "10.0.0.1:8080"
"#;
        let config = OvsNetConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.agent.mode, AgentMode::TunnelMesh);
        assert_eq!(config.agent.tunnel_ip, Some(Ipv4Addr::new(192, 168, 0, 10)));
        assert_eq!(config.tunnel.effective_key_max(), 0xffffff);
        assert_eq!(config.agent.poll_interval_secs, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OvsNetConfig::default();
        config.agent.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = OvsNetConfig::default();
        config.tunnel.key_max = Some(5000);
        assert!(config.validate().is_err());

        let mut config = OvsNetConfig::default();
        config.tunnel.key_min = 4095;
        assert!(config.validate().is_err());

        let mut config = OvsNetConfig::default();
        config.agent.mode = AgentMode::Controller;
        config.controller.rest_api = Some(" ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_mode_from_str() {
        assert_eq!("vlan".parse::<AgentMode>().unwrap(), AgentMode::Vlan);
        assert_eq!(
            "tunnel-mesh".parse::<AgentMode>().unwrap(),
            AgentMode::TunnelMesh
        );
        assert!("bogus".parse::<AgentMode>().is_err());
        assert_eq!(AgentMode::Controller.as_str(), "controller");
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = OvsNetConfig::load_or_default("/nonexistent/agent.toml").unwrap();
        assert_eq!(config.database.redis_host, "127.0.0.1");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[bridge]\nintegration_bridge = \"br-test\"\n").unwrap();

        let config = OvsNetConfig::load_or_default(&path).unwrap();
        assert_eq!(config.bridge.integration_bridge, "br-test");
        assert_eq!(config.bridge.root_helper, "sudo");
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[agent]\nmode = 7\n").unwrap();

        assert!(matches!(
            OvsNetConfig::load_or_default(&path),
            Err(OvsNetError::InvalidConfig { .. })
        ));
    }
}
