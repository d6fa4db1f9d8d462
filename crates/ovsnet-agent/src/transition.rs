//! Per-port binding transitions.
//!
//! Each tick resolves every observed port to `Some(network)` or `None`.
//! What the agent does with a port depends only on the previous and the
//! current resolution:
//!
//! | previous | current | transition |
//! |----------|---------|------------|
//! | `None` | `None` | `Unchanged` |
//! | `None` | `Some(n)` | `Bind` |
//! | `Some(n)` | `None` | `Unbind` |
//! | `Some(n)` | `Some(n)` | `Unchanged` |
//! | `Some(n)` | `Some(m)` | `Rebind` |

use ovsnet_bridge::VifPort;
use ovsnet_common::NetworkId;
use ovsnet_store::PortStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortTransition {
    Unchanged,
    Bind { network_id: NetworkId },
    Unbind { network_id: NetworkId },
    Rebind { from: NetworkId, to: NetworkId },
}

impl PortTransition {
    pub fn between(previous: Option<&str>, current: Option<&str>) -> Self {
        match (previous, current) {
            (None, None) => PortTransition::Unchanged,
            (None, Some(to)) => PortTransition::Bind {
                network_id: to.to_string(),
            },
            (Some(from), None) => PortTransition::Unbind {
                network_id: from.to_string(),
            },
            (Some(from), Some(to)) if from == to => PortTransition::Unchanged,
            (Some(from), Some(to)) => PortTransition::Rebind {
                from: from.to_string(),
                to: to.to_string(),
            },
        }
    }

    /// Network the port ends up on.
    pub fn target(&self) -> Option<&str> {
        match self {
            PortTransition::Bind { network_id } => Some(network_id),
            PortTransition::Rebind { to, .. } => Some(to),
            PortTransition::Unchanged | PortTransition::Unbind { .. } => None,
        }
    }
}

/// What the agent remembers about an observed port between ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortState {
    pub port: VifPort,
    /// Network the port is bound to on the bridge.
    pub network_id: Option<NetworkId>,
    /// Dead VLAN and drop flow are in place.
    pub isolated: bool,
    /// Status not yet written to the store.
    pub pending_status: Option<PortStatus>,
}

impl PortState {
    pub fn unseen(port: VifPort) -> Self {
        Self {
            port,
            network_id: None,
            isolated: false,
            pending_status: None,
        }
    }

    /// Returns true if `port` is the same bridge port as the one tracked.
    ///
    /// A re-plugged interface keeps its id but gets a new port, which starts
    /// over from scratch.
    pub fn is_same_port(&self, port: &VifPort) -> bool {
        self.port.port_name == port.port_name && self.port.ofport == port.ofport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transition_table() {
        assert_eq!(PortTransition::between(None, None), PortTransition::Unchanged);
        assert_eq!(
            PortTransition::between(None, Some("n1")),
            PortTransition::Bind {
                network_id: "n1".into()
            }
        );
        assert_eq!(
            PortTransition::between(Some("n1"), None),
            PortTransition::Unbind {
                network_id: "n1".into()
            }
        );
        assert_eq!(
            PortTransition::between(Some("n1"), Some("n1")),
            PortTransition::Unchanged
        );
        assert_eq!(
            PortTransition::between(Some("n1"), Some("n2")),
            PortTransition::Rebind {
                from: "n1".into(),
                to: "n2".into()
            }
        );
    }

    #[test]
    fn test_target() {
        assert_eq!(PortTransition::between(Some("a"), Some("b")).target(), Some("b"));
        assert_eq!(PortTransition::between(Some("a"), None).target(), None);
    }

    #[test]
    fn test_replugged_port_is_not_same() {
        let port = VifPort {
            port_name: "tap1".into(),
            ofport: 3,
            vif_id: "vif-1".into(),
            mac: "m".into(),
        };
        let state = PortState::unseen(port.clone());
        assert!(state.is_same_port(&port));
        assert!(!state.is_same_port(&VifPort { ofport: 4, ..port }));
    }
}
