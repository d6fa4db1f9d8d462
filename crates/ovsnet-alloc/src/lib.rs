//! Identifier allocators.
//!
//! - [`VlanPool`]: host-local VLAN tags, plain owned state
//! - [`TunnelKeyAllocator`]: global tunnel keys, optimistic store commits
//! - [`find_free_key`]: the pure gap finder behind the key allocator

pub mod tunnel_key;
pub mod vlan_pool;

pub use tunnel_key::{collapse_cursors, find_free_key, KeyRange, TunnelKeyAllocator};
pub use vlan_pool::VlanPool;
