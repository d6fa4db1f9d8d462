//! Agent lifecycle trait and shared identifiers.
//!
//! Every long-lived ovsnet daemon loop implements [`Agent`]: it is
//! initialized once (fatal on failure) and then driven tick by tick until
//! shutdown is requested.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::OvsNetResult;

/// Globally unique logical network identifier.
pub type NetworkId = String;

/// Identifier of a virtual interface (the `iface-id` external id).
pub type PortId = String;

/// Datapath identifier of one host's bridge, as a hex string.
pub type Dpid = String;

/// Network id under which external (uplink) ports are announced.
pub const NW_ID_EXTERNAL: &str = "__NW_ID_EXTERNAL__";

/// Network id under which GRE tunnel ports are announced.
pub const NW_ID_VPORT_GRE: &str = "__NW_ID_VPORT_GRE__";

/// Returns true for network ids the controller reserves for itself.
pub fn is_reserved_network(network_id: &str) -> bool {
    network_id == NW_ID_EXTERNAL || network_id == NW_ID_VPORT_GRE
}

/// Default values shared across crates.
pub mod defaults {
    use std::time::Duration;

    /// Sentinel VLAN for ports with no resolved binding.
    pub const DEAD_VLAN_TAG: u16 = 4095;

    /// Lowest VLAN tag handed out by the pool.
    pub const VLAN_MIN: u16 = 2;

    /// Highest VLAN tag handed out by the pool.
    pub const VLAN_MAX: u16 = 4093;

    /// Delay between two reconciliation ticks.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Default tunnel key floor.
    pub const TUNNEL_KEY_MIN: u32 = 0;

    /// Default tunnel key ceiling (12-bit keys).
    pub const TUNNEL_KEY_MAX: u32 = 4095;

    /// Bound on optimistic transaction retries.
    pub const MAX_TRANSACTION_RETRIES: usize = 16;

    /// Priority of the drop flow installed for isolated ports.
    pub const ISOLATE_FLOW_PRIORITY: u16 = 2;

    /// Priority of the catch-all normal-forwarding flow.
    pub const NORMAL_FLOW_PRIORITY: u16 = 1;
}

/// Counters describing what one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Ports seen on the bridge this tick.
    pub observed: usize,
    /// Ports moved onto their network.
    pub bound: usize,
    /// Ports taken off a network.
    pub unbound: usize,
    /// Ports placed on the dead VLAN.
    pub isolated: usize,
    /// Tracked ports that disappeared from the bridge.
    pub gone: usize,
    /// Operations that failed and were deferred to the next tick.
    pub errors: usize,
}

impl TickReport {
    /// Returns true if the tick changed nothing and hit no error.
    pub fn is_quiet(&self) -> bool {
        self.bound == 0 && self.unbound == 0 && self.gone == 0 && self.errors == 0
    }
}

/// Base trait for polling agents.
///
/// # Lifecycle
///
/// 1. Construction: the agent is built from configuration and its drivers
/// 2. `initialize()`: one-time setup; an error here is fatal
/// 3. `tick()`: called repeatedly, separated by `poll_interval()`
/// 4. Shutdown: the loop stops between ticks and the agent is dropped
#[async_trait]
pub trait Agent: Send {
    /// Returns the name of this agent (for logging).
    fn name(&self) -> &str;

    /// One-time setup before the first tick.
    async fn initialize(&mut self) -> OvsNetResult<()>;

    /// Runs one reconciliation pass.
    ///
    /// Never fails: per-tick trouble is logged and counted in the report.
    async fn tick(&mut self) -> TickReport;

    /// Delay between ticks.
    fn poll_interval(&self) -> Duration {
        defaults::POLL_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingAgent {
        ticks: usize,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn name(&self) -> &str {
            "counting"
        }

        async fn initialize(&mut self) -> OvsNetResult<()> {
            Ok(())
        }

        async fn tick(&mut self) -> TickReport {
            self.ticks += 1;
            TickReport {
                observed: self.ticks,
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_agent_trait() {
        let mut agent = CountingAgent { ticks: 0 };
        assert_eq!(agent.name(), "counting");
        agent.initialize().await.unwrap();

        let report = agent.tick().await;
        assert_eq!(report.observed, 1);
        assert!(report.is_quiet());
        assert_eq!(agent.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_reserved_networks() {
        assert!(is_reserved_network(NW_ID_EXTERNAL));
        assert!(is_reserved_network(NW_ID_VPORT_GRE));
        assert!(!is_reserved_network("net-1"));
    }

    #[test]
    fn test_tick_report_not_quiet() {
        let report = TickReport {
            bound: 1,
            ..Default::default()
        };
        assert!(!report.is_quiet());
    }
}
