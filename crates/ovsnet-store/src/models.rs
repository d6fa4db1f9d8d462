//! Records kept in the persistent store.

use ovsnet_common::{Dpid, NetworkId, PortId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// "This virtual interface, as seen by this host's bridge, belongs to this
/// network."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Interface id (`iface-id` external id).
    pub port_id: PortId,
    /// Logical network the interface belongs to.
    pub network_id: NetworkId,
    /// Datapath id of the host bridge the port lives on.
    pub dpid: Dpid,
    /// OpenFlow port number on that bridge.
    pub port_no: u32,
    /// MAC address of the interface.
    pub mac: String,
}

impl PortBinding {
    /// Creates a new port binding.
    pub fn new(
        port_id: impl Into<String>,
        network_id: impl Into<String>,
        dpid: impl Into<String>,
        port_no: u32,
        mac: impl Into<String>,
    ) -> Self {
        Self {
            port_id: port_id.into(),
            network_id: network_id.into(),
            dpid: dpid.into(),
            port_no,
            mac: mac.into(),
        }
    }
}

/// Operational status of a port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortStatus {
    /// Bound and forwarding.
    Up,
    /// Present but unbound, or detached.
    Down,
}

impl PortStatus {
    /// Returns the status as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::Up => "UP",
            PortStatus::Down => "DOWN",
        }
    }

    /// Parses a stored status value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(PortStatus::Up),
            "DOWN" => Some(PortStatus::Down),
            _ => None,
        }
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local VLAN tag held by a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanBinding {
    pub vlan_tag: u16,
    pub network_id: NetworkId,
}

/// Tunnel key held by a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelKeyBinding {
    pub network_id: NetworkId,
    pub tunnel_key: u32,
}

/// One participating bridge and its tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostNode {
    pub dpid: Dpid,
    pub address: Ipv4Addr,
}

/// Unordered pair of distinct hosts that need a direct tunnel.
///
/// The smaller dpid is always stored first, so `HostPair::new(a, b)` and
/// `HostPair::new(b, a)` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPair {
    low: Dpid,
    high: Dpid,
}

impl HostPair {
    /// Creates a normalized pair, `None` if both ends are the same host.
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Option<Self> {
        let (a, b) = (a.into(), b.into());
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn high(&self) -> &str {
        &self.high
    }

    /// Returns true if `dpid` is one end of the pair.
    pub fn contains(&self, dpid: &str) -> bool {
        self.low == dpid || self.high == dpid
    }

    /// Returns the other end of the pair, if `dpid` is one end.
    pub fn peer_of(&self, dpid: &str) -> Option<&str> {
        if self.low == dpid {
            Some(&self.high)
        } else if self.high == dpid {
            Some(&self.low)
        } else {
            None
        }
    }

    /// Storage key, `low|high`.
    pub fn to_key(&self) -> String {
        format!("{}|{}", self.low, self.high)
    }

    /// Parses a storage key produced by [`HostPair::to_key`].
    pub fn from_key(key: &str) -> Option<Self> {
        let (a, b) = key.split_once('|')?;
        Self::new(a, b)
    }
}

impl fmt::Display for HostPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// Kind of controller endpoint published into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// OpenFlow controller channel.
    Openflow,
    /// REST API endpoint.
    RestApi,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Openflow => "openflow",
            ServerKind::RestApi => "rest_api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openflow" => Some(ServerKind::Openflow),
            "rest_api" => Some(ServerKind::RestApi),
            _ => None,
        }
    }
}

/// Controller endpoint address published by the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerServer {
    pub kind: ServerKind,
    pub address: String,
}

/// Consistent read of the tunnel-key tables for one allocation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelKeySnapshot {
    /// Every "last issued key" row; more than one after a past race.
    pub cursors: Vec<u32>,
    /// Keys currently bound to networks.
    pub allocated: Vec<TunnelKeyBinding>,
    /// Version the commit must still match.
    pub version: u64,
}

impl TunnelKeySnapshot {
    /// Key already held by `network_id`, if any.
    pub fn key_of(&self, network_id: &str) -> Option<u32> {
        self.allocated
            .iter()
            .find(|b| b.network_id == network_id)
            .map(|b| b.tunnel_key)
    }

    /// Allocated keys in ascending order.
    pub fn sorted_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.allocated.iter().map(|b| b.tunnel_key).collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_pair_is_unordered() {
        let ab = HostPair::new("0000000000000002", "0000000000000001").unwrap();
        let ba = HostPair::new("0000000000000001", "0000000000000002").unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.low(), "0000000000000001");
        assert_eq!(ab.peer_of("0000000000000001"), Some("0000000000000002"));
        assert_eq!(ab.peer_of("0000000000000003"), None);
        assert!(HostPair::new("a", "a").is_none());
    }

    #[test]
    fn test_host_pair_key() {
        let pair = HostPair::new("b", "a").unwrap();
        assert_eq!(pair.to_key(), "a|b");
        assert_eq!(HostPair::from_key("a|b"), Some(pair));
        assert_eq!(HostPair::from_key("garbage"), None);
    }

    #[test]
    fn test_port_status_roundtrip() {
        assert_eq!(PortStatus::parse("UP"), Some(PortStatus::Up));
        assert_eq!(PortStatus::parse("down"), None);
        assert_eq!(PortStatus::Down.to_string(), "DOWN");
        assert_eq!(
            serde_json::to_string(&PortStatus::Up).unwrap(),
            "\"UP\""
        );
    }

    #[test]
    fn test_snapshot_helpers() {
        let snapshot = TunnelKeySnapshot {
            cursors: vec![3],
            allocated: vec![
                TunnelKeyBinding {
                    network_id: "n2".into(),
                    tunnel_key: 5,
                },
                TunnelKeyBinding {
                    network_id: "n1".into(),
                    tunnel_key: 2,
                },
            ],
            version: 7,
        };
        assert_eq!(snapshot.key_of("n1"), Some(2));
        assert_eq!(snapshot.key_of("n3"), None);
        assert_eq!(snapshot.sorted_keys(), vec![2, 5]);
    }
}
