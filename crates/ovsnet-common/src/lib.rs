//! Common infrastructure for the ovsnet agent, allocators and plugin.
//!
//! - [`shell`]: shell command execution with proper quoting
//! - [`Agent`]: lifecycle trait for polling daemons
//! - [`config`]: TOML configuration file
//! - [`error`]: error taxonomy shared by every crate
//!
//! # Example
//!
//! ```ignore
//! use ovsnet_common::{
//!     shell::{self, OVS_VSCTL_CMD, shellquote},
//!     OvsNetResult,
//! };
//!
//! async fn clear_tag(port: &str) -> OvsNetResult<()> {
//!     let cmd = format!("{} --timeout=2 remove Port {} tag 0-4095",
//!         OVS_VSCTL_CMD, shellquote(port));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod shell;

// Re-export commonly used items at crate root
pub use agent::{
    defaults, is_reserved_network, Agent, Dpid, NetworkId, PortId, TickReport, NW_ID_EXTERNAL,
    NW_ID_VPORT_GRE,
};
pub use config::{AgentMode, KeyWidth, OvsNetConfig, DEFAULT_CONFIG_PATH};
pub use error::{OvsNetError, OvsNetResult};
