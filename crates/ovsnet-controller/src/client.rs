//! Controller notification interface.

use async_trait::async_trait;
use ovsnet_common::OvsNetResult;
use tracing::{debug, warn};

use crate::error::{ControllerError, ControllerResult};

/// Calls the agent and plugin make towards the OpenFlow controller.
///
/// Every call is replayed freely, so implementations report "already
/// exists" and "not found" as distinct errors and callers pass results
/// through [`tolerate`].
#[async_trait]
pub trait ControllerClient: Send + Sync {
    async fn create_network(&self, network_id: &str) -> ControllerResult<()>;

    async fn update_network(&self, network_id: &str) -> ControllerResult<()>;

    async fn delete_network(&self, network_id: &str) -> ControllerResult<()>;

    async fn create_port(&self, network_id: &str, dpid: &str, port_no: u32)
        -> ControllerResult<()>;

    async fn update_port(&self, network_id: &str, dpid: &str, port_no: u32)
        -> ControllerResult<()>;

    async fn delete_port(&self, network_id: &str, dpid: &str, port_no: u32)
        -> ControllerResult<()>;

    async fn update_mac(
        &self,
        network_id: &str,
        dpid: &str,
        port_no: u32,
        mac: &str,
    ) -> ControllerResult<()>;

    async fn create_tunnel_key(&self, network_id: &str, key: u32) -> ControllerResult<()>;

    async fn delete_tunnel_key(&self, network_id: &str) -> ControllerResult<()>;

    /// Records that `port_no` on `dpid` is a tunnel to `remote_dpid`.
    async fn update_remote_dpid(
        &self,
        dpid: &str,
        port_no: u32,
        remote_dpid: &str,
    ) -> ControllerResult<()>;

    async fn delete_remote_dpid(&self, dpid: &str, port_no: u32) -> ControllerResult<()>;
}

/// Turns "already exists" and "not found" into success.
pub fn tolerate(operation: &str, result: ControllerResult<()>) -> OvsNetResult<()> {
    match result {
        Err(e) if e.is_tolerable() => {
            debug!(operation, error = %e, "Ignoring idempotent controller error");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

/// Like [`tolerate`], but only "not found" is accepted.
pub fn ignore_not_found(operation: &str, result: ControllerResult<()>) -> OvsNetResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(operation, "Controller resource already gone");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

/// Logs a failed best-effort call instead of propagating it.
///
/// Returns true if the call succeeded or failed tolerably.
pub fn best_effort(operation: &str, result: ControllerResult<()>) -> bool {
    match tolerate(operation, result) {
        Ok(()) => true,
        Err(e) => {
            warn!(operation, error = %e, "Controller notification failed");
            false
        }
    }
}

/// Controller that accepts every call and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopController;

#[async_trait]
impl ControllerClient for NoopController {
    async fn create_network(&self, _network_id: &str) -> ControllerResult<()> {
        Ok(())
    }

    async fn update_network(&self, _network_id: &str) -> ControllerResult<()> {
        Ok(())
    }

    async fn delete_network(&self, _network_id: &str) -> ControllerResult<()> {
        Ok(())
    }

    async fn create_port(&self, _: &str, _: &str, _: u32) -> ControllerResult<()> {
        Ok(())
    }

    async fn update_port(&self, _: &str, _: &str, _: u32) -> ControllerResult<()> {
        Ok(())
    }

    async fn delete_port(&self, _: &str, _: &str, _: u32) -> ControllerResult<()> {
        Ok(())
    }

    async fn update_mac(&self, _: &str, _: &str, _: u32, _: &str) -> ControllerResult<()> {
        Ok(())
    }

    async fn create_tunnel_key(&self, _network_id: &str, _key: u32) -> ControllerResult<()> {
        Ok(())
    }

    async fn delete_tunnel_key(&self, _network_id: &str) -> ControllerResult<()> {
        Ok(())
    }

    async fn update_remote_dpid(&self, _: &str, _: u32, _: &str) -> ControllerResult<()> {
        Ok(())
    }

    async fn delete_remote_dpid(&self, _: &str, _: u32) -> ControllerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsnet_common::OvsNetError;

    #[test]
    fn test_tolerate() {
        assert!(tolerate("create", Ok(())).is_ok());
        assert!(tolerate(
            "create",
            Err(ControllerError::AlreadyExists { path: "/n".into() })
        )
        .is_ok());
        assert!(matches!(
            tolerate(
                "create",
                Err(ControllerError::Transport {
                    path: "/n".into(),
                    message: "refused".into()
                })
            ),
            Err(OvsNetError::Controller { .. })
        ));
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found("delete", Err(ControllerError::NotFound { path: "/n".into() })).is_ok());
        assert!(ignore_not_found(
            "delete",
            Err(ControllerError::AlreadyExists { path: "/n".into() })
        )
        .is_err());
    }

    #[test]
    fn test_best_effort() {
        assert!(best_effort("update", Ok(())));
        assert!(!best_effort(
            "update",
            Err(ControllerError::Http {
                path: "/n".into(),
                status: 500,
                message: String::new()
            })
        ));
    }

    #[tokio::test]
    async fn test_noop_controller() {
        let ctl = NoopController;
        assert!(ctl.create_network("n1").await.is_ok());
        assert!(ctl.update_remote_dpid("a", 3, "b").await.is_ok());
    }
}
