//! Local VLAN tag pool.
//!
//! One pool per host: tags are only meaningful on that host's bridge, so
//! the pool is plain owned state with no locking.

use ovsnet_common::{defaults, OvsNetError, OvsNetResult};
use ovsnet_store::VlanBinding;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Maps logical networks to VLAN tags in `[VLAN_MIN, VLAN_MAX]`.
#[derive(Debug, Clone)]
pub struct VlanPool {
    free: BTreeSet<u16>,
    by_tag: HashMap<u16, String>,
    by_network: HashMap<String, u16>,
}

impl Default for VlanPool {
    fn default() -> Self {
        Self::new()
    }
}

impl VlanPool {
    /// Creates a pool with every tag free.
    pub fn new() -> Self {
        Self {
            free: (defaults::VLAN_MIN..=defaults::VLAN_MAX).collect(),
            by_tag: HashMap::new(),
            by_network: HashMap::new(),
        }
    }

    /// Creates a pool with `bindings` already taken.
    ///
    /// Out-of-range tags and tags or networks already seen are skipped with
    /// a warning.
    pub fn from_bindings<'a>(bindings: impl IntoIterator<Item = &'a VlanBinding>) -> Self {
        let mut pool = Self::new();
        for binding in bindings {
            if !pool.free.remove(&binding.vlan_tag) {
                warn!(
                    vlan_tag = binding.vlan_tag,
                    network_id = %binding.network_id,
                    "Ignoring persisted VLAN binding with unusable tag"
                );
                continue;
            }
            if pool.by_network.contains_key(&binding.network_id) {
                pool.free.insert(binding.vlan_tag);
                warn!(
                    vlan_tag = binding.vlan_tag,
                    network_id = %binding.network_id,
                    "Ignoring second persisted VLAN binding for network"
                );
                continue;
            }
            pool.bind(binding.vlan_tag, &binding.network_id);
        }
        pool
    }

    fn bind(&mut self, tag: u16, network_id: &str) {
        self.by_tag.insert(tag, network_id.to_string());
        self.by_network.insert(network_id.to_string(), tag);
    }

    /// Binds a free tag to `network_id`.
    ///
    /// A network that already holds a tag gets that tag back.
    pub fn acquire(&mut self, network_id: &str) -> OvsNetResult<u16> {
        if let Some(tag) = self.by_network.get(network_id) {
            return Ok(*tag);
        }
        let tag = self
            .free
            .pop_first()
            .ok_or_else(|| OvsNetError::exhausted("vlan tag"))?;
        self.bind(tag, network_id);
        debug!(vlan_tag = tag, network_id, "Acquired VLAN tag");
        Ok(tag)
    }

    /// Returns the tag held by `network_id` to the pool.
    pub fn release(&mut self, network_id: &str) -> Option<u16> {
        match self.by_network.remove(network_id) {
            Some(tag) => {
                self.by_tag.remove(&tag);
                self.free.insert(tag);
                debug!(vlan_tag = tag, network_id, "Released VLAN tag");
                Some(tag)
            }
            None => {
                warn!(network_id, "No VLAN tag bound to network, nothing to release");
                None
            }
        }
    }

    /// Network bound to `tag`, if any.
    pub fn lookup(&self, tag: u16) -> Option<&str> {
        self.by_tag.get(&tag).map(String::as_str)
    }

    /// Tag bound to `network_id`, if any.
    pub fn tag_of(&self, network_id: &str) -> Option<u16> {
        self.by_network.get(network_id).copied()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn bound_count(&self) -> usize {
        self.by_network.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const CAPACITY: usize = (defaults::VLAN_MAX - defaults::VLAN_MIN + 1) as usize;

    #[test]
    fn test_acquire_and_lookup() {
        let mut pool = VlanPool::new();
        let tag = pool.acquire("net-1").unwrap();
        assert!((2..=4093).contains(&tag));
        assert_eq!(pool.lookup(tag), Some("net-1"));
        assert_eq!(pool.tag_of("net-1"), Some(tag));
        assert_eq!(pool.acquire("net-1").unwrap(), tag);
        assert_eq!(pool.bound_count(), 1);
    }

    #[test]
    fn test_double_release_is_tolerated() {
        let mut pool = VlanPool::new();
        let tag = pool.acquire("net-1").unwrap();
        assert_eq!(pool.release("net-1"), Some(tag));
        assert_eq!(pool.release("net-1"), None);
        assert_eq!(pool.lookup(tag), None);
        assert_eq!(pool.free_count(), CAPACITY);
    }

    #[test]
    fn test_exhaustion_then_reuse() {
        let mut pool = VlanPool::new();
        for i in 0..CAPACITY {
            pool.acquire(&format!("net-{}", i)).unwrap();
        }
        assert_eq!(CAPACITY, 4092);
        assert!(matches!(
            pool.acquire("one-too-many"),
            Err(OvsNetError::ResourceExhausted { .. })
        ));

        let released = pool.release("net-17").unwrap();
        assert_eq!(pool.acquire("one-too-many").unwrap(), released);
    }

    #[test]
    fn test_from_bindings() {
        let bindings = vec![
            VlanBinding {
                vlan_tag: 7,
                network_id: "n1".into(),
            },
            VlanBinding {
                vlan_tag: 4095,
                network_id: "bad".into(),
            },
            VlanBinding {
                vlan_tag: 7,
                network_id: "dup-tag".into(),
            },
        ];
        let mut pool = VlanPool::from_bindings(&bindings);
        assert_eq!(pool.lookup(7), Some("n1"));
        assert_eq!(pool.tag_of("bad"), None);
        assert_eq!(pool.tag_of("dup-tag"), None);
        assert_eq!(pool.bound_count(), 1);

        let tag = pool.acquire("n2").unwrap();
        assert_ne!(tag, 7);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Acquire(u8),
        Release(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..40).prop_map(Op::Acquire),
            (0u8..40).prop_map(Op::Release),
        ]
    }

    proptest! {
        /// No two live networks ever share a tag, and every tag is in range.
        #[test]
        fn tags_stay_unique_and_in_range(ops in prop::collection::vec(op(), 1..200)) {
            let mut pool = VlanPool::new();
            for op in ops {
                match op {
                    Op::Acquire(n) => {
                        let tag = pool.acquire(&format!("net-{}", n)).unwrap();
                        prop_assert!((defaults::VLAN_MIN..=defaults::VLAN_MAX).contains(&tag));
                    }
                    Op::Release(n) => {
                        pool.release(&format!("net-{}", n));
                    }
                }

                let tags: Vec<u16> = (0u8..40)
                    .filter_map(|n| pool.tag_of(&format!("net-{}", n)))
                    .collect();
                let unique: HashSet<u16> = tags.iter().copied().collect();
                prop_assert_eq!(tags.len(), unique.len());
                prop_assert_eq!(pool.free_count() + pool.bound_count(), CAPACITY);
            }
        }
    }
}
