//! Open vSwitch integration for ovsnet.
//!
//! - [`BridgeDriver`]: the primitive operations the agent needs
//! - [`OvsBridge`]: implementation over `ovs-vsctl` / `ovs-ofctl`
//! - [`BridgeView`]: typed per-tick snapshot of the bridge ports
//! - [`commands`]: shell command builders
//! - [`ovsdb`]: parsing of OVSDB column values

pub mod commands;
pub mod driver;
pub mod endpoint;
pub mod ovs;
pub mod ovsdb;
pub mod view;

pub use driver::BridgeDriver;
pub use endpoint::resolve_tunnel_ip;
pub use ovs::OvsBridge;
pub use view::{BridgeView, ExternalPort, TunnelPort, VifPort, ATTACHED_MAC, IFACE_ID};
