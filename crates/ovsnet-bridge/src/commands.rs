//! Shell command builders for bridge operations

use ovsnet_common::shell::{shellquote, OVS_OFCTL_CMD, OVS_VSCTL_CMD};
use std::net::Ipv4Addr;

/// Connection methods `ovs-vsctl set-controller` understands.
pub const CONTROLLER_METHODS: &[&str] = &["ssl", "tcp", "unix", "pssl", "ptcp", "punix"];

fn vsctl(timeout_secs: u64, args: &str) -> String {
    format!("{} --timeout={} {}", OVS_VSCTL_CMD, timeout_secs, args)
}

/// Build list ports command
pub fn build_list_ports_cmd(timeout_secs: u64, bridge: &str) -> String {
    vsctl(timeout_secs, &format!("list-ports {}", shellquote(bridge)))
}

/// Build get database column command
///
/// e.g. `ovs-vsctl --timeout=2 get "Interface" "tap0" "ofport"`
pub fn build_get_column_cmd(timeout_secs: u64, table: &str, record: &str, column: &str) -> String {
    vsctl(
        timeout_secs,
        &format!(
            "get {} {} {}",
            shellquote(table),
            shellquote(record),
            shellquote(column)
        ),
    )
}

/// Build datapath id query command
pub fn build_datapath_id_cmd(timeout_secs: u64, bridge: &str) -> String {
    build_get_column_cmd(timeout_secs, "Bridge", bridge, "datapath_id")
}

/// Build set port tag command
pub fn build_set_port_tag_cmd(timeout_secs: u64, port: &str, tag: u16) -> String {
    vsctl(
        timeout_secs,
        &format!("set Port {} tag={}", shellquote(port), tag),
    )
}

/// Build clear port tag command
pub fn build_clear_port_tag_cmd(timeout_secs: u64, port: &str) -> String {
    vsctl(timeout_secs, &format!("clear Port {} tag", shellquote(port)))
}

/// Build add GRE tunnel port command
///
/// `key` is either a fixed key or `flow` to let the controller set it
/// per packet.
pub fn build_add_tunnel_port_cmd(
    timeout_secs: u64,
    bridge: &str,
    name: &str,
    local_ip: Ipv4Addr,
    remote_ip: Ipv4Addr,
    key: Option<&str>,
) -> String {
    let mut options = format!("local_ip={},remote_ip={}", local_ip, remote_ip);
    if let Some(key) = key {
        options.push_str(&format!(",key={}", key));
    }
    vsctl(
        timeout_secs,
        &format!(
            "add-port {} {} -- set Interface {} type=gre {}",
            shellquote(bridge),
            shellquote(name),
            shellquote(name),
            shellquote(&format!("options={{{}}}", options))
        ),
    )
}

/// Build delete port command (no error if absent)
pub fn build_delete_port_cmd(timeout_secs: u64, bridge: &str, name: &str) -> String {
    vsctl(
        timeout_secs,
        &format!(
            "-- --if-exists del-port {} {}",
            shellquote(bridge),
            shellquote(name)
        ),
    )
}

/// Normalizes a controller address into an `ovs-vsctl` target.
///
/// A bare `host:port` gets a `tcp:` prefix.
pub fn controller_target(address: &str) -> String {
    let method = address.split(':').next().unwrap_or_default();
    if CONTROLLER_METHODS.contains(&method) {
        address.to_string()
    } else {
        format!("tcp:{}", address)
    }
}

/// Build set controller command
pub fn build_set_controller_cmd(timeout_secs: u64, bridge: &str, targets: &[String]) -> String {
    let targets: Vec<String> = targets
        .iter()
        .map(|t| shellquote(&controller_target(t)))
        .collect();
    vsctl(
        timeout_secs,
        &format!("set-controller {} {}", shellquote(bridge), targets.join(" ")),
    )
}

/// Build add flow command
///
/// e.g. `ovs-ofctl add-flow "br-int" "priority=2,in_port=5,actions=drop"`
pub fn build_add_flow_cmd(bridge: &str, priority: u16, matches: Option<&str>, actions: &str) -> String {
    let mut flow = format!("priority={}", priority);
    if let Some(m) = matches.filter(|m| !m.is_empty()) {
        flow.push(',');
        flow.push_str(m);
    }
    flow.push_str(&format!(",actions={}", actions));
    format!(
        "{} add-flow {} {}",
        OVS_OFCTL_CMD,
        shellquote(bridge),
        shellquote(&flow)
    )
}

/// Build delete flows command; no match removes every flow
pub fn build_delete_flows_cmd(bridge: &str, matches: Option<&str>) -> String {
    match matches.filter(|m| !m.is_empty()) {
        Some(m) => format!(
            "{} del-flows {} {}",
            OVS_OFCTL_CMD,
            shellquote(bridge),
            shellquote(m)
        ),
        None => format!("{} del-flows {}", OVS_OFCTL_CMD, shellquote(bridge)),
    }
}

/// Flow match for traffic entering on `ofport`.
pub fn in_port_match(ofport: u32) -> String {
    format!("in_port={}", ofport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_list_ports_cmd() {
        let cmd = build_list_ports_cmd(2, "br-int");
        assert_eq!(cmd, "ovs-vsctl --timeout=2 list-ports \"br-int\"");
    }

    #[test]
    fn test_build_get_column_cmd() {
        let cmd = build_get_column_cmd(2, "Interface", "tap0", "external_ids");
        assert!(cmd.contains("get \"Interface\" \"tap0\" \"external_ids\""));
        assert!(build_datapath_id_cmd(5, "br-int").contains("--timeout=5"));
    }

    #[test]
    fn test_build_tag_cmds() {
        assert!(build_set_port_tag_cmd(2, "tap0", 4095).contains("set Port \"tap0\" tag=4095"));
        assert!(build_clear_port_tag_cmd(2, "tap0").contains("clear Port \"tap0\" tag"));
    }

    #[test]
    fn test_build_add_tunnel_port_cmd() {
        let cmd = build_add_tunnel_port_cmd(
            2,
            "br-int",
            "gre0a000002-0001",
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Some("flow"),
        );
        assert!(cmd.contains("add-port \"br-int\" \"gre0a000002-0001\""));
        assert!(cmd.contains("type=gre"));
        assert!(cmd.contains("local_ip=10.0.0.1,remote_ip=10.0.0.2,key=flow"));
    }

    #[test]
    fn test_build_delete_port_cmd() {
        let cmd = build_delete_port_cmd(2, "br-int", "tap0");
        assert!(cmd.contains("--if-exists del-port \"br-int\" \"tap0\""));
    }

    #[test]
    fn test_controller_target() {
        assert_eq!(controller_target("10.0.0.1:6633"), "tcp:10.0.0.1:6633");
        assert_eq!(controller_target("ssl:10.0.0.1:6633"), "ssl:10.0.0.1:6633");
        assert_eq!(controller_target("punix:/var/run/ctl"), "punix:/var/run/ctl");
        let cmd = build_set_controller_cmd(2, "br-int", &["10.0.0.1:6633".to_string()]);
        assert!(cmd.contains("set-controller \"br-int\" \"tcp:10.0.0.1:6633\""));
    }

    #[test]
    fn test_build_flow_cmds() {
        let cmd = build_add_flow_cmd("br-int", 2, Some(&in_port_match(5)), "drop");
        assert_eq!(
            cmd,
            "ovs-ofctl add-flow \"br-int\" \"priority=2,in_port=5,actions=drop\""
        );
        let cmd = build_add_flow_cmd("br-int", 1, None, "normal");
        assert!(cmd.contains("\"priority=1,actions=normal\""));

        assert_eq!(
            build_delete_flows_cmd("br-int", Some("in_port=5")),
            "ovs-ofctl del-flows \"br-int\" \"in_port=5\""
        );
        assert_eq!(
            build_delete_flows_cmd("br-int", None),
            "ovs-ofctl del-flows \"br-int\""
        );
    }
}
