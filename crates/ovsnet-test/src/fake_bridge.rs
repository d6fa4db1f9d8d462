//! In-memory `BridgeDriver`.
//!
//! Holds ports, tags and flows the way OVS would, so agent ticks can be
//! asserted against the resulting bridge state instead of command strings.

use async_trait::async_trait;
use ovsnet_bridge::{BridgeDriver, ATTACHED_MAC, IFACE_ID};
use ovsnet_common::{OvsNetError, OvsNetResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

/// One installed flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub priority: u16,
    pub matches: Option<String>,
    pub actions: String,
}

/// One port on the fake bridge.
#[derive(Debug, Clone, Default)]
pub struct FakePort {
    pub ofport: Option<u32>,
    pub port_type: String,
    pub external_ids: HashMap<String, String>,
    pub options: HashMap<String, String>,
    pub tag: Option<u16>,
}

#[derive(Debug, Default)]
struct FakeState {
    dpid: String,
    ports: BTreeMap<String, FakePort>,
    flows: Vec<Flow>,
    controllers: Vec<String>,
    next_ofport: u32,
    list_fails: bool,
    failing_ports: HashSet<String>,
    ops: Vec<String>,
}

/// Fake bridge for agent and mesh tests.
#[derive(Debug)]
pub struct FakeBridge {
    name: String,
    state: Mutex<FakeState>,
}

impl FakeBridge {
    pub fn new(name: impl Into<String>, dpid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FakeState {
                dpid: dpid.into(),
                next_ofport: 100,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Plugs a VM interface into the bridge.
    pub fn attach_vif(&self, name: &str, ofport: u32, vif_id: &str, mac: &str) {
        let external_ids = HashMap::from([
            (IFACE_ID.to_string(), vif_id.to_string()),
            (ATTACHED_MAC.to_string(), mac.to_string()),
            ("iface-status".to_string(), "active".to_string()),
        ]);
        self.state().ports.insert(
            name.to_string(),
            FakePort {
                ofport: Some(ofport),
                external_ids,
                ..Default::default()
            },
        );
    }

    /// Adds a plain uplink port.
    pub fn attach_external(&self, name: &str, ofport: u32) {
        self.state().ports.insert(
            name.to_string(),
            FakePort {
                ofport: Some(ofport),
                ..Default::default()
            },
        );
    }

    /// Adds a GRE port as if created out of band.
    pub fn attach_tunnel(&self, name: &str, ofport: u32, local: Ipv4Addr, remote: Ipv4Addr) {
        let options = HashMap::from([
            ("local_ip".to_string(), local.to_string()),
            ("remote_ip".to_string(), remote.to_string()),
        ]);
        self.state().ports.insert(
            name.to_string(),
            FakePort {
                ofport: Some(ofport),
                port_type: "gre".to_string(),
                options,
                ..Default::default()
            },
        );
    }

    /// Adds a port that has no OpenFlow number yet.
    pub fn attach_unnumbered(&self, name: &str) {
        self.state().ports.insert(name.to_string(), FakePort::default());
    }

    /// Unplugs a port.
    pub fn detach(&self, name: &str) {
        self.state().ports.remove(name);
    }

    /// Makes `list_ports` fail until cleared.
    pub fn fail_list(&self, fail: bool) {
        self.state().list_fails = fail;
    }

    /// Makes every read and write on `name` fail until cleared.
    pub fn fail_port(&self, name: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.failing_ports.insert(name.to_string());
        } else {
            state.failing_ports.remove(name);
        }
    }

    pub fn tag_of(&self, name: &str) -> Option<u16> {
        self.state().ports.get(name).and_then(|p| p.tag)
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.state().ports.contains_key(name)
    }

    pub fn port(&self, name: &str) -> Option<FakePort> {
        self.state().ports.get(name).cloned()
    }

    pub fn port_names(&self) -> Vec<String> {
        self.state().ports.keys().cloned().collect()
    }

    pub fn flows(&self) -> Vec<Flow> {
        self.state().flows.clone()
    }

    /// Returns true if a drop flow for traffic from `ofport` is installed.
    pub fn has_drop_flow(&self, ofport: u32) -> bool {
        let wanted = format!("in_port={}", ofport);
        self.state()
            .flows
            .iter()
            .any(|f| f.actions == "drop" && f.matches.as_deref() == Some(wanted.as_str()))
    }

    pub fn controllers(&self) -> Vec<String> {
        self.state().controllers.clone()
    }

    /// Mutating operations performed so far, e.g. `set_port_tag tap1 4095`.
    pub fn ops(&self) -> Vec<String> {
        self.state().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }

    fn check_port(state: &FakeState, operation: &str, port: &str) -> OvsNetResult<()> {
        if state.failing_ports.contains(port) {
            return Err(OvsNetError::dataplane(operation, format!("{}: timed out", port)));
        }
        if !state.ports.contains_key(port) {
            return Err(OvsNetError::dataplane(
                operation,
                format!("no row \"{}\" in table Interface", port),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BridgeDriver for FakeBridge {
    fn bridge_name(&self) -> &str {
        &self.name
    }

    async fn list_ports(&self) -> OvsNetResult<Vec<String>> {
        let state = self.state();
        if state.list_fails {
            return Err(OvsNetError::dataplane("list_ports", "timed out"));
        }
        Ok(state.ports.keys().cloned().collect())
    }

    async fn get_port_attr(&self, port: &str, attr: &str) -> OvsNetResult<String> {
        let state = self.state();
        Self::check_port(&state, "get_port_attr", port)?;
        let p = &state.ports[port];
        Ok(match attr {
            "ofport" => p
                .ofport
                .map(|o| o.to_string())
                .unwrap_or_else(|| "[]".to_string()),
            "type" => p.port_type.clone(),
            _ => String::new(),
        })
    }

    async fn get_port_external_ids(&self, port: &str) -> OvsNetResult<HashMap<String, String>> {
        let state = self.state();
        Self::check_port(&state, "get_port_external_ids", port)?;
        Ok(state.ports[port].external_ids.clone())
    }

    async fn get_port_options(&self, port: &str) -> OvsNetResult<HashMap<String, String>> {
        let state = self.state();
        Self::check_port(&state, "get_port_options", port)?;
        Ok(state.ports[port].options.clone())
    }

    async fn set_port_tag(&self, port: &str, tag: u16) -> OvsNetResult<()> {
        let mut state = self.state();
        Self::check_port(&state, "set_port_tag", port)?;
        if let Some(p) = state.ports.get_mut(port) {
            p.tag = Some(tag);
        }
        state.ops.push(format!("set_port_tag {} {}", port, tag));
        Ok(())
    }

    async fn clear_port_tag(&self, port: &str) -> OvsNetResult<()> {
        let mut state = self.state();
        Self::check_port(&state, "clear_port_tag", port)?;
        if let Some(p) = state.ports.get_mut(port) {
            p.tag = None;
        }
        state.ops.push(format!("clear_port_tag {}", port));
        Ok(())
    }

    async fn add_flow(
        &self,
        priority: u16,
        matches: Option<&str>,
        actions: &str,
    ) -> OvsNetResult<()> {
        let mut state = self.state();
        let matches = matches.map(String::from);
        state
            .flows
            .retain(|f| !(f.priority == priority && f.matches == matches));
        state.ops.push(format!(
            "add_flow priority={} {} actions={}",
            priority,
            matches.as_deref().unwrap_or("*"),
            actions
        ));
        state.flows.push(Flow {
            priority,
            matches,
            actions: actions.to_string(),
        });
        Ok(())
    }

    async fn delete_flows(&self, matches: Option<&str>) -> OvsNetResult<()> {
        let mut state = self.state();
        match matches {
            Some(m) => state.flows.retain(|f| f.matches.as_deref() != Some(m)),
            None => state.flows.clear(),
        }
        state
            .ops
            .push(format!("delete_flows {}", matches.unwrap_or("*")));
        Ok(())
    }

    async fn add_tunnel_port(
        &self,
        name: &str,
        local_ip: Ipv4Addr,
        remote_ip: Ipv4Addr,
        key: Option<&str>,
    ) -> OvsNetResult<()> {
        let mut state = self.state();
        if state.failing_ports.contains(name) {
            return Err(OvsNetError::dataplane("add_tunnel_port", "timed out"));
        }
        let ofport = state.next_ofport;
        state.next_ofport += 1;

        let mut options = HashMap::from([
            ("local_ip".to_string(), local_ip.to_string()),
            ("remote_ip".to_string(), remote_ip.to_string()),
        ]);
        if let Some(key) = key {
            options.insert("key".to_string(), key.to_string());
        }
        state.ports.insert(
            name.to_string(),
            FakePort {
                ofport: Some(ofport),
                port_type: "gre".to_string(),
                options,
                ..Default::default()
            },
        );
        state.ops.push(format!("add_tunnel_port {} {}", name, remote_ip));
        Ok(())
    }

    async fn delete_port(&self, name: &str) -> OvsNetResult<()> {
        let mut state = self.state();
        if state.failing_ports.contains(name) {
            return Err(OvsNetError::dataplane("delete_port", "timed out"));
        }
        state.ports.remove(name);
        state.ops.push(format!("delete_port {}", name));
        Ok(())
    }

    async fn get_datapath_id(&self) -> OvsNetResult<String> {
        Ok(self.state().dpid.clone())
    }

    async fn set_controller(&self, targets: &[String]) -> OvsNetResult<()> {
        let mut state = self.state();
        state.controllers = targets.to_vec();
        state.ops.push(format!("set_controller {}", targets.join(" ")));
        Ok(())
    }
}
