//! The reconciliation loop.
//!
//! Every tick compares the virtual interfaces on the local bridge with the
//! desired port bindings in the store and converges each port through the
//! configured [`AgentDriver`]:
//!
//! 1. read desired bindings and VLAN bindings (unreadable store: nothing is
//!    desired this tick)
//! 2. snapshot the bridge (unreadable bridge: skip the tick)
//! 3. apply each port's [`PortTransition`], recording UP/DOWN; a rebind
//!    unbinds from the old network before binding to the new one
//! 4. isolate every port left without a network
//! 5. mark vanished ports DOWN and forget them
//! 6. run the driver's post-tick hook (tunnel mesh)
//!
//! A failed unbind or isolate leaves the port's tracked state untouched, so
//! the same step is retried on the next tick. A port that cannot be bound
//! is left without a network and isolated.

use async_trait::async_trait;
use ovsnet_bridge::{BridgeDriver, BridgeView, VifPort};
use ovsnet_common::{Agent, OvsNetResult, PortId, TickReport};
use ovsnet_store::{NetStore, PortBinding, PortStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::drivers::AgentDriver;
use crate::transition::{PortState, PortTransition};

/// Desired state read at the start of a tick.
#[derive(Debug, Default)]
struct Desired {
    bindings: HashMap<PortId, PortBinding>,
    vlan_tags: HashMap<String, u16>,
}

/// Host agent keeping the local bridge in line with the store.
pub struct ReconciliationAgent {
    name: String,
    bridge: Arc<dyn BridgeDriver>,
    store: Arc<dyn NetStore>,
    driver: Box<dyn AgentDriver>,
    poll_interval: Duration,
    dpid: Option<String>,
    ports: BTreeMap<PortId, PortState>,
    external_ports: BTreeSet<String>,
}

impl ReconciliationAgent {
    pub fn new(
        bridge: Arc<dyn BridgeDriver>,
        store: Arc<dyn NetStore>,
        driver: Box<dyn AgentDriver>,
    ) -> Self {
        Self {
            name: format!("ovsnet-agent[{}]", driver.mode().as_str()),
            bridge,
            store,
            driver,
            poll_interval: ovsnet_common::defaults::POLL_INTERVAL,
            dpid: None,
            ports: BTreeMap::new(),
            external_ports: BTreeSet::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Datapath id of the local bridge, known after `initialize`.
    pub fn dpid(&self) -> Option<&str> {
        self.dpid.as_deref()
    }

    /// Tracked state of the port with interface id `vif_id`.
    pub fn port_state(&self, vif_id: &str) -> Option<&PortState> {
        self.ports.get(vif_id)
    }

    pub fn tracked_ports(&self) -> usize {
        self.ports.len()
    }

    async fn read_desired(&self) -> Desired {
        let bindings = match self.store.list_port_bindings().await {
            Ok(bindings) => bindings,
            Err(e) => {
                warn!(error = %e, "Cannot read port bindings, treating every port as unbound this tick");
                return Desired::default();
            }
        };
        let vlan_tags = match self.store.list_vlan_bindings().await {
            Ok(vlans) => vlans
                .into_iter()
                .map(|v| (v.network_id, v.vlan_tag))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Cannot read VLAN bindings");
                HashMap::new()
            }
        };
        Desired {
            bindings: bindings
                .into_iter()
                .map(|b| (b.port_id.clone(), b))
                .collect(),
            vlan_tags,
        }
    }

    async fn set_status(&self, port_id: &str, status: PortStatus) -> OvsNetResult<()> {
        self.store.set_port_status(port_id, status).await?;
        debug!(port_id, status = %status, "Recorded port status");
        Ok(())
    }

    /// Applies the transition of one observed port. Returns the new state,
    /// or the error that kept the bridge from changing.
    ///
    /// Status writes that fail stay pending on the returned state and are
    /// retried on later ticks.
    async fn converge_port(
        &self,
        port: &VifPort,
        mut state: PortState,
        desired: &Desired,
        report: &mut TickReport,
    ) -> OvsNetResult<PortState> {
        let binding = desired.bindings.get(&port.vif_id);
        let transition = PortTransition::between(
            state.network_id.as_deref(),
            binding.map(|b| b.network_id.as_str()),
        );

        // A rebind leaves the old network before joining the new one.
        let leaving = match &transition {
            PortTransition::Unbind { network_id } => Some(network_id),
            PortTransition::Rebind { from, .. } => Some(from),
            PortTransition::Unchanged | PortTransition::Bind { .. } => None,
        };
        if let Some(network_id) = leaving {
            self.driver
                .unbind(self.bridge.as_ref(), port, network_id)
                .await?;
            info!(port = %port, network_id = %network_id, "Unbound port");
            state.network_id = None;
            state.pending_status = Some(PortStatus::Down);
            report.unbound += 1;
        }

        if let (Some(_), Some(binding)) = (transition.target(), binding) {
            let network_id = &binding.network_id;
            let vlan_tag = desired.vlan_tags.get(network_id).copied();
            // A port that cannot be bound falls through to isolation.
            match self
                .driver
                .bind(self.bridge.as_ref(), port, binding, vlan_tag)
                .await
            {
                Ok(()) => {
                    info!(port = %port, network_id = %network_id, vlan_tag, "Bound port");
                    state.network_id = Some(network_id.clone());
                    state.isolated = false;
                    state.pending_status = Some(PortStatus::Up);
                    report.bound += 1;
                }
                Err(e) => {
                    warn!(port = %port, network_id = %network_id, error = %e, "Cannot bind port, retrying next tick");
                    report.errors += 1;
                }
            }
        }

        if state.network_id.is_none() && !state.isolated {
            self.driver.isolate(self.bridge.as_ref(), port).await?;
            info!(port = %port, "Isolated port with no network");
            state.isolated = true;
            report.isolated += 1;
        }

        if let Some(status) = state.pending_status {
            match self.set_status(&port.vif_id, status).await {
                Ok(()) => state.pending_status = None,
                Err(e) => {
                    warn!(port = %port, status = %status, error = %e, "Cannot record port status");
                    report.errors += 1;
                }
            }
        }
        Ok(state)
    }

    async fn converge_ports(&mut self, view: &BridgeView, desired: &Desired, report: &mut TickReport) {
        let mut next = BTreeMap::new();

        for (vif_id, port) in &view.vif_ports {
            let state = match self.ports.remove(vif_id) {
                Some(state) if state.is_same_port(port) => state,
                Some(state) => {
                    debug!(vif_id = %vif_id, old = %state.port.port_name, new = %port.port_name, "Interface moved to a new port");
                    PortState::unseen(port.clone())
                }
                None => PortState::unseen(port.clone()),
            };

            let state = match self.converge_port(port, state.clone(), desired, report).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(port = %port, error = %e, "Port left unchanged until next tick");
                    report.errors += 1;
                    state
                }
            };
            next.insert(vif_id.clone(), state);
        }

        // Ports listed but unreadable keep their state.
        let (kept, vanished): (Vec<_>, Vec<_>) = std::mem::take(&mut self.ports)
            .into_iter()
            .partition(|(_, state)| view.is_unreadable(&state.port.port_name));
        next.extend(kept);

        for (vif_id, state) in vanished {
            if desired.bindings.contains_key(&vif_id) {
                if let Err(e) = self.set_status(&vif_id, PortStatus::Down).await {
                    warn!(vif_id = %vif_id, error = %e, "Cannot mark detached port DOWN");
                    report.errors += 1;
                }
            }
            info!(port = %state.port, "Port detached");
            report.gone += 1;
        }

        self.ports = next;
    }

    async fn announce_external_ports(&mut self, view: &BridgeView, report: &mut TickReport) {
        let current: BTreeSet<String> = view
            .external_ports
            .iter()
            .map(|p| p.port_name.clone())
            .collect();

        for port in &view.external_ports {
            if self.external_ports.contains(&port.port_name) {
                continue;
            }
            match self.driver.external_port_added(port).await {
                Ok(()) => {
                    self.external_ports.insert(port.port_name.clone());
                }
                Err(e) => {
                    warn!(port = %port.port_name, error = %e, "Cannot announce external port");
                    report.errors += 1;
                }
            }
        }
        self.external_ports.retain(|name| current.contains(name));
    }
}

#[async_trait]
impl Agent for ReconciliationAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(agent = %self.name))]
    async fn initialize(&mut self) -> OvsNetResult<()> {
        let dpid = self.bridge.get_datapath_id().await?;
        self.driver.setup(self.bridge.as_ref(), &dpid).await?;
        info!(
            dpid = %dpid,
            bridge = self.bridge.bridge_name(),
            "Agent initialized"
        );
        self.dpid = Some(dpid);
        Ok(())
    }

    #[instrument(skip(self), fields(agent = %self.name))]
    async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let desired = self.read_desired().await;
        let view = match BridgeView::snapshot(self.bridge.as_ref()).await {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, "Cannot list bridge ports, skipping tick");
                report.errors += 1;
                return report;
            }
        };
        report.observed = view.vif_ports.len();

        self.converge_ports(&view, &desired, &mut report).await;
        self.announce_external_ports(&view, &mut report).await;

        if let Err(e) = self.driver.after_tick(self.bridge.as_ref(), &view).await {
            warn!(error = %e, "Post-tick step failed");
            report.errors += 1;
        }

        if report.is_quiet() {
            debug!(observed = report.observed, "Tick complete");
        } else {
            info!(
                observed = report.observed,
                bound = report.bound,
                unbound = report.unbound,
                isolated = report.isolated,
                gone = report.gone,
                errors = report.errors,
                "Tick complete"
            );
        }
        report
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
