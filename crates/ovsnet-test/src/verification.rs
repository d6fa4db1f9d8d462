//! Assertion helpers over store state.

use ovsnet_common::OvsNetError;
use ovsnet_store::{HostPair, NetStore, PortStatus};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Store error: {0}")]
    Store(#[from] OvsNetError),

    #[error("Status mismatch for port '{port_id}': expected {expected:?}, got {actual:?}")]
    StatusMismatch {
        port_id: String,
        expected: Option<PortStatus>,
        actual: Option<PortStatus>,
    },

    #[error("Unexpected binding for port '{port_id}'")]
    UnexpectedBinding { port_id: String },

    #[error("Tunnel requests mismatch: expected {expected:?}, got {actual:?}")]
    TunnelRequestMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Tunnel key {key} is held by more than one network")]
    DuplicateTunnelKey { key: u32 },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Store verification helper
pub struct StoreVerifier<'a> {
    store: &'a dyn NetStore,
}

impl<'a> StoreVerifier<'a> {
    pub fn new(store: &'a dyn NetStore) -> Self {
        Self { store }
    }

    /// Verifies the recorded status of a port; `None` means no record.
    pub async fn assert_port_status(
        &self,
        port_id: &str,
        expected: Option<PortStatus>,
    ) -> VerifyResult<()> {
        let actual = self.store.get_port_status(port_id).await?;
        if actual != expected {
            return Err(VerificationError::StatusMismatch {
                port_id: port_id.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub async fn assert_no_binding(&self, port_id: &str) -> VerifyResult<()> {
        if self.store.get_port_binding(port_id).await?.is_some() {
            return Err(VerificationError::UnexpectedBinding {
                port_id: port_id.to_string(),
            });
        }
        Ok(())
    }

    /// Verifies the exact set of requested host pairs.
    pub async fn assert_tunnel_requests(&self, expected: &[(&str, &str)]) -> VerifyResult<()> {
        let expected: BTreeSet<HostPair> = expected
            .iter()
            .filter_map(|(a, b)| HostPair::new(*a, *b))
            .collect();
        let actual = self.store.list_tunnel_requests().await?;
        if actual != expected {
            return Err(VerificationError::TunnelRequestMismatch {
                expected: expected.iter().map(HostPair::to_key).collect(),
                actual: actual.iter().map(HostPair::to_key).collect(),
            });
        }
        Ok(())
    }

    /// Verifies that no key is bound to two networks.
    pub async fn assert_tunnel_keys_unique(&self) -> VerifyResult<()> {
        let mut seen = HashSet::new();
        for binding in self.store.list_tunnel_keys().await? {
            if !seen.insert(binding.tunnel_key) {
                return Err(VerificationError::DuplicateTunnelKey {
                    key: binding.tunnel_key,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsnet_store::MemoryStore;

    #[tokio::test]
    async fn test_port_status_assertions() {
        let store = MemoryStore::new();
        store.set_port_status("vif-1", PortStatus::Up).await.unwrap();

        let verifier = StoreVerifier::new(&store);
        verifier
            .assert_port_status("vif-1", Some(PortStatus::Up))
            .await
            .unwrap();
        assert!(matches!(
            verifier.assert_port_status("vif-1", Some(PortStatus::Down)).await,
            Err(VerificationError::StatusMismatch { .. })
        ));
        verifier.assert_port_status("vif-2", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_request_assertions() {
        let store = MemoryStore::new();
        let pair = HostPair::new("b", "a").unwrap();
        store.add_tunnel_request(&pair).await.unwrap();

        let verifier = StoreVerifier::new(&store);
        verifier.assert_tunnel_requests(&[("a", "b")]).await.unwrap();
        assert!(verifier.assert_tunnel_requests(&[]).await.is_err());
    }
}
