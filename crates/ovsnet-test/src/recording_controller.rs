//! `ControllerClient` that records every call.

use async_trait::async_trait;
use ovsnet_controller::{ControllerClient, ControllerError, ControllerResult};
use std::sync::{Mutex, MutexGuard};

/// One recorded controller call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    CreateNetwork(String),
    UpdateNetwork(String),
    DeleteNetwork(String),
    CreatePort {
        network_id: String,
        dpid: String,
        port_no: u32,
    },
    UpdatePort {
        network_id: String,
        dpid: String,
        port_no: u32,
    },
    DeletePort {
        network_id: String,
        dpid: String,
        port_no: u32,
    },
    UpdateMac {
        network_id: String,
        dpid: String,
        port_no: u32,
        mac: String,
    },
    CreateTunnelKey {
        network_id: String,
        key: u32,
    },
    DeleteTunnelKey(String),
    UpdateRemoteDpid {
        dpid: String,
        port_no: u32,
        remote_dpid: String,
    },
    DeleteRemoteDpid {
        dpid: String,
        port_no: u32,
    },
}

/// Canned answer returned for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerResponse {
    #[default]
    Ok,
    NotFound,
    AlreadyExists,
    Unavailable,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<ControllerCall>,
    response: ControllerResponse,
}

/// Records calls and answers with a configurable response.
#[derive(Debug, Default)]
pub struct RecordingController {
    inner: Mutex<Recorder>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Sets the answer for subsequent calls.
    pub fn respond_with(&self, response: ControllerResponse) {
        self.lock().response = response;
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.lock().calls.clone()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    /// Returns the number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&ControllerCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ControllerCall) -> ControllerResult<()> {
        let mut inner = self.lock();
        let path = format!("{:?}", call);
        inner.calls.push(call);
        match inner.response {
            ControllerResponse::Ok => Ok(()),
            ControllerResponse::NotFound => Err(ControllerError::NotFound { path }),
            ControllerResponse::AlreadyExists => Err(ControllerError::AlreadyExists { path }),
            ControllerResponse::Unavailable => Err(ControllerError::Transport {
                path,
                message: "connection refused".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ControllerClient for RecordingController {
    async fn create_network(&self, network_id: &str) -> ControllerResult<()> {
        self.record(ControllerCall::CreateNetwork(network_id.to_string()))
    }

    async fn update_network(&self, network_id: &str) -> ControllerResult<()> {
        self.record(ControllerCall::UpdateNetwork(network_id.to_string()))
    }

    async fn delete_network(&self, network_id: &str) -> ControllerResult<()> {
        self.record(ControllerCall::DeleteNetwork(network_id.to_string()))
    }

    async fn create_port(&self, network_id: &str, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.record(ControllerCall::CreatePort {
            network_id: network_id.to_string(),
            dpid: dpid.to_string(),
            port_no,
        })
    }

    async fn update_port(&self, network_id: &str, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.record(ControllerCall::UpdatePort {
            network_id: network_id.to_string(),
            dpid: dpid.to_string(),
            port_no,
        })
    }

    async fn delete_port(&self, network_id: &str, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.record(ControllerCall::DeletePort {
            network_id: network_id.to_string(),
            dpid: dpid.to_string(),
            port_no,
        })
    }

    async fn update_mac(
        &self,
        network_id: &str,
        dpid: &str,
        port_no: u32,
        mac: &str,
    ) -> ControllerResult<()> {
        self.record(ControllerCall::UpdateMac {
            network_id: network_id.to_string(),
            dpid: dpid.to_string(),
            port_no,
            mac: mac.to_string(),
        })
    }

    async fn create_tunnel_key(&self, network_id: &str, key: u32) -> ControllerResult<()> {
        self.record(ControllerCall::CreateTunnelKey {
            network_id: network_id.to_string(),
            key,
        })
    }

    async fn delete_tunnel_key(&self, network_id: &str) -> ControllerResult<()> {
        self.record(ControllerCall::DeleteTunnelKey(network_id.to_string()))
    }

    async fn update_remote_dpid(
        &self,
        dpid: &str,
        port_no: u32,
        remote_dpid: &str,
    ) -> ControllerResult<()> {
        self.record(ControllerCall::UpdateRemoteDpid {
            dpid: dpid.to_string(),
            port_no,
            remote_dpid: remote_dpid.to_string(),
        })
    }

    async fn delete_remote_dpid(&self, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.record(ControllerCall::DeleteRemoteDpid {
            dpid: dpid.to_string(),
            port_no,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_records_in_order() {
        let ctl = RecordingController::new();
        ctl.create_network("n1").await.unwrap();
        ctl.update_mac("n1", "a", 1, "m").await.unwrap();

        assert_eq!(
            ctl.calls(),
            vec![
                ControllerCall::CreateNetwork("n1".into()),
                ControllerCall::UpdateMac {
                    network_id: "n1".into(),
                    dpid: "a".into(),
                    port_no: 1,
                    mac: "m".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_canned_response() {
        let ctl = RecordingController::new();
        ctl.respond_with(ControllerResponse::NotFound);
        assert!(ctl.delete_network("n1").await.unwrap_err().is_not_found());
        ctl.respond_with(ControllerResponse::Unavailable);
        assert!(!ctl.delete_network("n1").await.unwrap_err().is_tolerable());
        assert_eq!(ctl.calls().len(), 2);
    }
}
