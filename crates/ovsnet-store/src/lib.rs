//! Persistent network state for ovsnet.
//!
//! The store is the single source of truth shared by the plugin, the
//! allocators and every host agent:
//!
//! - [`NetStore`]: the async store interface
//! - [`MemoryStore`]: in-process backend with fault injection
//! - [`RedisStore`]: shared Redis backend
//! - [`register_host`]: host node bookkeeping

pub mod hosts;
pub mod memory;
pub mod models;
pub mod redis_store;
pub mod store;

pub use hosts::{dpid_for_address, register_host, HostRegistration};
pub use memory::MemoryStore;
pub use models::{
    ControllerServer, HostNode, HostPair, PortBinding, PortStatus, ServerKind, TunnelKeyBinding,
    TunnelKeySnapshot, VlanBinding,
};
pub use redis_store::RedisStore;
pub use store::{tables, NetStore};
