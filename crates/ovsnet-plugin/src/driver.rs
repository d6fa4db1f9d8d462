//! The plugin-facing network driver interface.

use async_trait::async_trait;
use ovsnet_common::OvsNetResult;
use ovsnet_store::PortBinding;

/// What the surrounding plugin calls when tenants change networks and
/// ports.
///
/// Every operation is safe to replay.
#[async_trait]
pub trait NetworkDriver: Send {
    /// Get the name of this driver
    fn name(&self) -> &str;

    /// Re-derives in-memory state and re-announces persisted state after a
    /// restart.
    async fn sync_all(&mut self) -> OvsNetResult<()>;

    /// Allocates the resources of a new network.
    ///
    /// Fails with `ResourceExhausted` when no identifier is left.
    async fn create_network(&mut self, network_id: &str) -> OvsNetResult<()>;

    /// Releases the resources of a network. Unknown networks are ignored.
    async fn delete_network(&mut self, network_id: &str) -> OvsNetResult<()>;

    /// Records that a port belongs to a network.
    async fn bind_port(&mut self, binding: &PortBinding) -> OvsNetResult<()>;

    /// Forgets a port. Unknown ports are ignored.
    async fn unbind_port(&mut self, port_id: &str) -> OvsNetResult<()>;
}
