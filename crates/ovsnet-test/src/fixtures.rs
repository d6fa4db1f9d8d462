//! Reusable identifiers and record builders.

use ovsnet_store::{HostNode, PortBinding};
use std::net::Ipv4Addr;

pub const DPID_A: &str = "00000000000000a1";
pub const DPID_B: &str = "00000000000000b2";
pub const DPID_C: &str = "00000000000000c3";

pub const IP_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const IP_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const IP_C: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

/// Deterministic MAC for the n-th test interface.
pub fn mac(n: u32) -> String {
    format!("fa:16:3e:00:{:02x}:{:02x}", (n >> 8) & 0xff, n & 0xff)
}

/// Builder for a port binding with test defaults.
#[derive(Debug, Clone)]
pub struct BindingBuilder {
    binding: PortBinding,
}

impl BindingBuilder {
    pub fn new(port_id: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            binding: PortBinding::new(port_id, network_id, DPID_A, 1, mac(1)),
        }
    }

    pub fn on(mut self, dpid: impl Into<String>, port_no: u32) -> Self {
        self.binding.dpid = dpid.into();
        self.binding.port_no = port_no;
        self.binding.mac = mac(port_no);
        self
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.binding.mac = mac.into();
        self
    }

    pub fn build(self) -> PortBinding {
        self.binding
    }
}

/// Shorthand for `BindingBuilder::new(..).on(..).build()`.
pub fn binding(port_id: &str, network_id: &str, dpid: &str, port_no: u32) -> PortBinding {
    BindingBuilder::new(port_id, network_id)
        .on(dpid, port_no)
        .build()
}

pub fn host(dpid: &str, address: Ipv4Addr) -> HostNode {
    HostNode {
        dpid: dpid.to_string(),
        address,
    }
}
