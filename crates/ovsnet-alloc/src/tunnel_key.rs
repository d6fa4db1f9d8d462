//! Tunnel key allocation.
//!
//! Keys are global: every agent and the plugin share one key space through
//! the store. Allocation reads a snapshot, picks a key with
//! [`find_free_key`], and commits optimistically; a commit that loses a race
//! is retried from a fresh snapshot.
//!
//! Deleting a key rewinds the cursor below it (see
//! [`NetStore::delete_tunnel_key`]), so freed keys are issued again before
//! higher ones.

use ovsnet_common::config::TunnelConfig;
use ovsnet_common::{defaults, OvsNetError, OvsNetResult};
use ovsnet_store::{NetStore, TunnelKeyBinding};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Usable key range.
///
/// `min` is a reserved floor: the cursor starts there and issued keys lie in
/// `min + 1 ..= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub min: u32,
    pub max: u32,
}

impl Default for KeyRange {
    fn default() -> Self {
        Self {
            min: defaults::TUNNEL_KEY_MIN,
            max: defaults::TUNNEL_KEY_MAX,
        }
    }
}

impl KeyRange {
    pub fn new(min: u32, max: u32) -> OvsNetResult<Self> {
        if min >= max {
            return Err(OvsNetError::invalid_config(
                "tunnel.key_min",
                format!("key range {}..{} is empty", min, max),
            ));
        }
        Ok(Self { min, max })
    }

    pub fn from_config(config: &TunnelConfig) -> OvsNetResult<Self> {
        Self::new(config.key_min, config.effective_key_max())
    }

    /// Number of keys that can be issued.
    pub fn capacity(&self) -> u64 {
        u64::from(self.max) - u64::from(self.min)
    }
}

/// Collapses the cursor rows into one cursor value.
///
/// No row means the range floor. Several rows (left by a past race) collapse
/// to the largest, and a value outside the range resets to the floor.
pub fn collapse_cursors(cursors: &[u32], range: KeyRange) -> u32 {
    match cursors.iter().max() {
        Some(&last) if last >= range.min && last <= range.max => last,
        Some(&last) => {
            warn!(cursor = last, min = range.min, max = range.max, "Tunnel key cursor out of range, resetting");
            range.min
        }
        None => range.min,
    }
}

fn first_free_after(sorted: &[u32], cursor: u32, max: u32) -> Option<u32> {
    let taken = |key: u64| sorted.binary_search(&(key as u32)).is_ok();
    let max = u64::from(max);

    let candidate = u64::from(cursor) + 1;
    if candidate > max {
        return None;
    }
    if !taken(candidate) {
        return Some(candidate as u32);
    }

    let start = sorted.partition_point(|&k| k < cursor);
    sorted[start..]
        .iter()
        .map(|&k| u64::from(k) + 1)
        .take_while(|&next| next <= max)
        .find(|&next| !taken(next))
        .map(|next| next as u32)
}

/// Picks the next key to issue.
///
/// `sorted` holds the allocated keys in ascending order. The key after
/// `cursor` is probed first, then the first gap above a key `>= cursor`.
/// If nothing is free up to `range.max`, the search wraps once to the range
/// floor. `None` means the range is full.
pub fn find_free_key(sorted: &[u32], cursor: u32, range: KeyRange) -> Option<u32> {
    first_free_after(sorted, cursor, range.max).or_else(|| {
        if cursor > range.min {
            first_free_after(sorted, range.min, range.max)
        } else {
            None
        }
    })
}

/// Store-backed allocator of tunnel keys.
pub struct TunnelKeyAllocator {
    store: Arc<dyn NetStore>,
    range: KeyRange,
    max_retries: usize,
}

impl TunnelKeyAllocator {
    pub fn new(store: Arc<dyn NetStore>, range: KeyRange) -> Self {
        Self {
            store,
            range,
            max_retries: defaults::MAX_TRANSACTION_RETRIES,
        }
    }

    /// Overrides the number of attempts before giving up.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn range(&self) -> KeyRange {
        self.range
    }

    /// Allocates a key for `network_id`, or returns the one it already holds.
    ///
    /// Fails with `ResourceExhausted` if the range is full or if every
    /// attempt lost a race.
    #[instrument(skip(self))]
    pub async fn allocate(&self, network_id: &str) -> OvsNetResult<u32> {
        for attempt in 1..=self.max_retries {
            match self.try_allocate(network_id).await {
                Ok(key) => {
                    info!(key, attempt, "Allocated tunnel key");
                    return Ok(key);
                }
                Err(OvsNetError::Conflict { .. }) => {
                    debug!(attempt, "Tunnel key commit conflicted, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            retries = self.max_retries,
            "Giving up tunnel key allocation after repeated conflicts"
        );
        Err(OvsNetError::exhausted("tunnel key"))
    }

    async fn try_allocate(&self, network_id: &str) -> OvsNetResult<u32> {
        let snapshot = self.store.tunnel_key_snapshot().await?;
        if let Some(key) = snapshot.key_of(network_id) {
            return Ok(key);
        }

        let cursor = collapse_cursors(&snapshot.cursors, self.range);
        let key = find_free_key(&snapshot.sorted_keys(), cursor, self.range)
            .ok_or_else(|| OvsNetError::exhausted("tunnel key"))?;

        let binding = TunnelKeyBinding {
            network_id: network_id.to_string(),
            tunnel_key: key,
        };
        self.store
            .commit_tunnel_key(snapshot.version, &binding, key)
            .await?;
        Ok(key)
    }

    /// Key held by `network_id`.
    pub async fn get(&self, network_id: &str) -> OvsNetResult<u32> {
        self.store
            .get_tunnel_key(network_id)
            .await?
            .ok_or_else(|| OvsNetError::not_found("TUNNEL_KEY", network_id))
    }

    /// Releases the key held by `network_id`; a missing key is fine.
    #[instrument(skip(self))]
    pub async fn delete(&self, network_id: &str) -> OvsNetResult<()> {
        if self.store.delete_tunnel_key(network_id).await? {
            info!("Released tunnel key");
        } else {
            debug!("No tunnel key to release");
        }
        Ok(())
    }
}
