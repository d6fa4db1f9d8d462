//! Local tunnel endpoint discovery.

use once_cell::sync::Lazy;
use ovsnet_common::config::OvsNetConfig;
use ovsnet_common::shell::{self, shellquote, IP_CMD};
use ovsnet_common::{OvsNetError, OvsNetResult};
use regex::Regex;
use std::net::Ipv4Addr;
use tracing::info;

/// Any routable address; only used to pick the outgoing source address.
const PROBE_DESTINATION: &str = "8.8.8.8";

static ROUTE_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bsrc\s+(\d{1,3}(?:\.\d{1,3}){3})").expect("Invalid regex pattern"));

static INET_ADDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\binet\s+(\d{1,3}(?:\.\d{1,3}){3})/").expect("Invalid regex pattern"));

/// Extracts the `src` address from `ip -4 route get` output.
pub fn parse_route_src(output: &str) -> Option<Ipv4Addr> {
    ROUTE_SRC_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extracts the first IPv4 address from `ip -4 -o addr show` output.
pub fn parse_interface_addr(output: &str) -> Option<Ipv4Addr> {
    INET_ADDR_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Build route lookup command
pub fn build_route_get_cmd() -> String {
    format!("{} -4 route get {}", IP_CMD, PROBE_DESTINATION)
}

/// Build interface address command
pub fn build_addr_show_cmd(interface: &str) -> String {
    format!("{} -4 -o addr show dev {}", IP_CMD, shellquote(interface))
}

/// Resolves the address this host terminates tunnels on.
///
/// Order: `agent.tunnel_ip`, then the first address of
/// `agent.physical_interface`, then the source address of the default
/// route.
pub async fn resolve_tunnel_ip(config: &OvsNetConfig) -> OvsNetResult<Ipv4Addr> {
    if let Some(ip) = config.agent.tunnel_ip {
        return Ok(ip);
    }

    let (cmd, parse, field): (String, fn(&str) -> Option<Ipv4Addr>, &str) =
        match config.agent.physical_interface.as_deref() {
            Some(iface) => (
                build_addr_show_cmd(iface),
                parse_interface_addr,
                "agent.physical_interface",
            ),
            None => (build_route_get_cmd(), parse_route_src, "agent.tunnel_ip"),
        };

    let output = shell::exec_or_throw(&cmd).await?;
    let ip = parse(&output).ok_or_else(|| {
        OvsNetError::invalid_config(field, format!("no IPv4 address found in '{}'", output))
    })?;
    info!(tunnel_ip = %ip, "Detected tunnel endpoint");
    Ok(ip)
}
