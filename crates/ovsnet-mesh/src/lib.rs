//! Tunnel mesh for ovsnet.
//!
//! - [`required_pairs`]: which hosts need a direct tunnel, from bindings
//! - [`TunnelMeshPlanner`]: persisted request maintenance and per-host
//!   tunnel port convergence
//! - [`gre_port_name`]: deterministic tunnel port names

pub mod naming;
pub mod planner;

pub use naming::{gre_port_name, MAX_PORT_NAME_LEN};
pub use planner::{required_pairs, MeshDelta, TunnelMeshPlanner};
