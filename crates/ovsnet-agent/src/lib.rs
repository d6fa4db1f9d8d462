//! Host reconciliation agent for ovsnet.
//!
//! # Responsibilities
//!
//! - Poll the integration bridge for virtual interfaces
//! - Put each interface on the network its store binding names, or isolate
//!   it on the dead VLAN with a drop flow
//! - Record UP/DOWN status of every binding
//! - In tunnel-mesh mode, keep one GRE port per peer host sharing a network
//!
//! # Flavors
//!
//! | Mode | Driver | Controller |
//! |------|--------|------------|
//! | `vlan` | [`VlanAgentDriver`] | none |
//! | `controller` | [`ControllerAgentDriver`] | OpenFlow + REST |
//! | `tunnel-mesh` | [`MeshAgentDriver`] | OpenFlow + REST, GRE mesh |

pub mod agent;
pub mod drivers;
pub mod transition;

pub use agent::ReconciliationAgent;
pub use drivers::{
    build_driver, isolate_port, AgentDriver, ControllerAddresses, ControllerAgentDriver,
    MeshAgentDriver, VlanAgentDriver,
};
pub use transition::{PortState, PortTransition};
