//! Typed snapshot of the ports on a bridge.

use ovsnet_common::{OvsNetResult, PortId};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

use crate::driver::BridgeDriver;

/// External id naming the virtual interface.
pub const IFACE_ID: &str = "iface-id";

/// External id carrying the interface MAC.
pub const ATTACHED_MAC: &str = "attached-mac";

/// A bridge port backing a virtual machine interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifPort {
    pub port_name: String,
    pub ofport: u32,
    pub vif_id: PortId,
    pub mac: String,
}

impl fmt::Display for VifPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iface-id={}, vif_mac={}, port_name={}, ofport={}",
            self.vif_id, self.mac, self.port_name, self.ofport
        )
    }
}

/// An unmanaged uplink port (no external ids, not a tunnel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalPort {
    pub port_name: String,
    pub ofport: u32,
}

/// A GRE port towards another host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelPort {
    pub port_name: String,
    pub ofport: u32,
    pub local_ip: Ipv4Addr,
    pub remote_ip: Ipv4Addr,
}

/// Ports present on the bridge at one instant.
#[derive(Debug, Clone, Default)]
pub struct BridgeView {
    /// Virtual interface ports keyed by interface id.
    pub vif_ports: BTreeMap<PortId, VifPort>,
    pub external_ports: Vec<ExternalPort>,
    pub tunnel_ports: Vec<TunnelPort>,
    /// Ports listed on the bridge whose attributes could not be read.
    pub unreadable: Vec<String>,
}

enum Classified {
    Vif(VifPort),
    External(ExternalPort),
    Tunnel(TunnelPort),
    Skipped,
}

impl BridgeView {
    /// Reads every port from `driver`.
    ///
    /// Fails only if the port list itself cannot be read. A port whose
    /// attributes fail to load lands in `unreadable`; ports without an
    /// assigned OpenFlow number are skipped.
    pub async fn snapshot(driver: &dyn BridgeDriver) -> OvsNetResult<Self> {
        let mut view = BridgeView::default();

        for name in driver.list_ports().await? {
            match classify(driver, &name).await {
                Ok(Classified::Vif(port)) => {
                    if let Some(previous) = view.vif_ports.get(&port.vif_id) {
                        warn!(
                            vif_id = %port.vif_id,
                            first = %previous.port_name,
                            second = %port.port_name,
                            "Interface id present on two ports, keeping the last"
                        );
                    }
                    view.vif_ports.insert(port.vif_id.clone(), port);
                }
                Ok(Classified::External(port)) => view.external_ports.push(port),
                Ok(Classified::Tunnel(port)) => view.tunnel_ports.push(port),
                Ok(Classified::Skipped) => {}
                Err(e) => {
                    warn!(port = %name, error = %e, "Cannot read port attributes");
                    view.unreadable.push(name);
                }
            }
        }

        debug!(
            vifs = view.vif_ports.len(),
            external = view.external_ports.len(),
            tunnels = view.tunnel_ports.len(),
            unreadable = view.unreadable.len(),
            "Bridge snapshot"
        );
        Ok(view)
    }

    /// Returns true if `port_name` was listed but could not be read.
    pub fn is_unreadable(&self, port_name: &str) -> bool {
        self.unreadable.iter().any(|p| p == port_name)
    }

    /// Tunnel ports keyed by remote endpoint.
    pub fn tunnels_by_remote(&self) -> BTreeMap<Ipv4Addr, &TunnelPort> {
        self.tunnel_ports.iter().map(|t| (t.remote_ip, t)).collect()
    }
}

async fn classify(driver: &dyn BridgeDriver, name: &str) -> OvsNetResult<Classified> {
    let ofport = match driver.get_ofport(name).await? {
        Some(ofport) => ofport,
        None => return Ok(Classified::Skipped),
    };

    let external_ids = driver.get_port_external_ids(name).await?;
    if let (Some(vif_id), Some(mac)) = (external_ids.get(IFACE_ID), external_ids.get(ATTACHED_MAC))
    {
        return Ok(Classified::Vif(VifPort {
            port_name: name.to_string(),
            ofport,
            vif_id: vif_id.clone(),
            mac: mac.clone(),
        }));
    }

    let options = driver.get_port_options(name).await?;
    if let Some(remote) = options.get("remote_ip") {
        let port_type = driver.get_port_attr(name, "type").await?;
        let local = options.get("local_ip");
        return Ok(match (port_type.as_str(), local) {
            ("gre", Some(local)) => match (local.parse(), remote.parse()) {
                (Ok(local_ip), Ok(remote_ip)) => Classified::Tunnel(TunnelPort {
                    port_name: name.to_string(),
                    ofport,
                    local_ip,
                    remote_ip,
                }),
                _ => {
                    debug!(port = name, "Tunnel port with non-IPv4 endpoints ignored");
                    Classified::Skipped
                }
            },
            _ => Classified::Skipped,
        });
    }

    if external_ids.is_empty() {
        Ok(Classified::External(ExternalPort {
            port_name: name.to_string(),
            ofport,
        }))
    } else {
        Ok(Classified::Skipped)
    }
}
