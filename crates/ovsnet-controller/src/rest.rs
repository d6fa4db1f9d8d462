//! REST implementation of [`ControllerClient`].
//!
//! Resource layout:
//!
//! | Resource | Path |
//! |----------|------|
//! | network | `/v1.0/networks/{network}` |
//! | port | `/v1.0/networks/{network}/{dpid}_{port}` |
//! | mac | `/v1.0/networks/{network}/{dpid}_{port}/macs/{mac}` |
//! | tunnel key | `/v1.0/tunnels/networks/{network}/key/{key}` |
//! | remote dpid | `/v1.0/tunnels/switches/{dpid}/ports/{port}/{remote_dpid}` |
//!
//! `POST` creates, `PUT` creates or updates, `DELETE` removes.

use async_trait::async_trait;
use ovsnet_common::{OvsNetError, OvsNetResult};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::client::ControllerClient;
use crate::error::{ControllerError, ControllerResult};

const API_PREFIX: &str = "/v1.0";

/// HTTP client for the controller REST API.
#[derive(Debug, Clone)]
pub struct RestController {
    http: Client,
    base_url: String,
}

impl RestController {
    /// Creates a client for `address` (`host:port` or a full URL).
    pub fn new(address: &str, timeout: Duration) -> OvsNetResult<Self> {
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(OvsNetError::invalid_config(
                "controller.rest_api",
                "must not be empty",
            ));
        }
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OvsNetError::invalid_config("controller.rest_api", e.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self))]
    async fn call(&self, method: Method, path: String) -> ControllerResult<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .request(method.clone(), &url)
            .send()
            .await
            .map_err(|e| ControllerError::Transport {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Controller call succeeded");
            return Ok(());
        }

        match status {
            StatusCode::NOT_FOUND => Err(ControllerError::NotFound { path }),
            StatusCode::CONFLICT => Err(ControllerError::AlreadyExists { path }),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(ControllerError::Http {
                    path,
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

fn network_path(network_id: &str) -> String {
    format!("{}/networks/{}", API_PREFIX, network_id)
}

fn port_path(network_id: &str, dpid: &str, port_no: u32) -> String {
    format!("{}/{}_{}", network_path(network_id), dpid, port_no)
}

fn tunnel_key_path(network_id: &str) -> String {
    format!("{}/tunnels/networks/{}/key", API_PREFIX, network_id)
}

fn tunnel_port_path(dpid: &str, port_no: u32) -> String {
    format!("{}/tunnels/switches/{}/ports/{}", API_PREFIX, dpid, port_no)
}

#[async_trait]
impl ControllerClient for RestController {
    async fn create_network(&self, network_id: &str) -> ControllerResult<()> {
        self.call(Method::POST, network_path(network_id)).await
    }

    async fn update_network(&self, network_id: &str) -> ControllerResult<()> {
        self.call(Method::PUT, network_path(network_id)).await
    }

    async fn delete_network(&self, network_id: &str) -> ControllerResult<()> {
        self.call(Method::DELETE, network_path(network_id)).await
    }

    async fn create_port(&self, network_id: &str, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.call(Method::POST, port_path(network_id, dpid, port_no))
            .await
    }

    async fn update_port(&self, network_id: &str, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.call(Method::PUT, port_path(network_id, dpid, port_no))
            .await
    }

    async fn delete_port(&self, network_id: &str, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.call(Method::DELETE, port_path(network_id, dpid, port_no))
            .await
    }

    async fn update_mac(
        &self,
        network_id: &str,
        dpid: &str,
        port_no: u32,
        mac: &str,
    ) -> ControllerResult<()> {
        let path = format!("{}/macs/{}", port_path(network_id, dpid, port_no), mac);
        self.call(Method::PUT, path).await
    }

    async fn create_tunnel_key(&self, network_id: &str, key: u32) -> ControllerResult<()> {
        let path = format!("{}/{}", tunnel_key_path(network_id), key);
        self.call(Method::POST, path).await
    }

    async fn delete_tunnel_key(&self, network_id: &str) -> ControllerResult<()> {
        self.call(Method::DELETE, tunnel_key_path(network_id)).await
    }

    async fn update_remote_dpid(
        &self,
        dpid: &str,
        port_no: u32,
        remote_dpid: &str,
    ) -> ControllerResult<()> {
        let path = format!("{}/{}", tunnel_port_path(dpid, port_no), remote_dpid);
        self.call(Method::PUT, path).await
    }

    async fn delete_remote_dpid(&self, dpid: &str, port_no: u32) -> ControllerResult<()> {
        self.call(Method::DELETE, tunnel_port_path(dpid, port_no))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> RestController {
        RestController::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_base_url() {
        let ctl = RestController::new("10.0.0.1:8080", Duration::from_secs(1)).unwrap();
        assert_eq!(ctl.base_url(), "http://10.0.0.1:8080");
        let ctl = RestController::new("https://ctl/", Duration::from_secs(1)).unwrap();
        assert_eq!(ctl.base_url(), "https://ctl");
        assert!(RestController::new(" ", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_paths() {
        assert_eq!(port_path("n1", "0000000000000001", 3), "/v1.0/networks/n1/0000000000000001_3");
        assert_eq!(tunnel_key_path("n1"), "/v1.0/tunnels/networks/n1/key");
        assert_eq!(tunnel_port_path("a", 4), "/v1.0/tunnels/switches/a/ports/4");
    }

    #[tokio::test]
    async fn test_create_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/networks/net-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ctl = client_for(&server).await;
        ctl.create_network("net-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1.0/networks/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/networks/dup"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1.0/networks/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let ctl = client_for(&server).await;
        assert!(matches!(
            ctl.delete_network("gone").await,
            Err(ControllerError::NotFound { .. })
        ));
        assert!(matches!(
            ctl.create_network("dup").await,
            Err(ControllerError::AlreadyExists { .. })
        ));
        match ctl.update_network("broken").await {
            Err(ControllerError::Http { status, message, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "internal");
            }
            other => panic!("Expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_port_and_tunnel_calls() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1.0/networks/n1/0000000000000001_5/macs/fa:16:3e:00:00:01"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/tunnels/networks/n1/key/7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1.0/tunnels/switches/0000000000000001/ports/9/0000000000000002"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ctl = client_for(&server).await;
        ctl.update_mac("n1", "0000000000000001", 5, "fa:16:3e:00:00:01")
            .await
            .unwrap();
        ctl.create_tunnel_key("n1", 7).await.unwrap();
        ctl.update_remote_dpid("0000000000000001", 9, "0000000000000002")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_error() {
        // nothing listens on port 9 (discard) in the test environment
        let ctl = RestController::new("127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            ctl.create_network("n1").await,
            Err(ControllerError::Transport { .. })
        ));
    }
}
