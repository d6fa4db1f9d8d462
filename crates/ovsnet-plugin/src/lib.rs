//! Plugin-side network drivers.
//!
//! The plugin owns tenant CRUD; these drivers do the allocation and
//! bookkeeping behind it:
//!
//! - [`VlanNetworkDriver`]: one VLAN tag per network
//! - [`TunnelNetworkDriver`]: one tunnel key per network, tunnel mesh
//!   maintenance and controller notification

pub mod driver;
pub mod tunnel;
pub mod vlan;

pub use driver::NetworkDriver;
pub use tunnel::TunnelNetworkDriver;
pub use vlan::VlanNetworkDriver;
