use std::sync::Mutex;

use eds_shard::ShardAccessor;
use eds_types::ShardKey;
use lru::LruCache;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;

/// Bounded LRU of open shard accessors, with striped locks that serialize
/// acquisition per key.
///
/// Only entries no caller still holds are evicted. When every entry is in
/// use the cache grows past its capacity and shrinks again as handles are
/// dropped and new entries arrive.
pub(crate) struct AccessorCache {
    stripes: Vec<AsyncMutex<()>>,
    entries: Mutex<LruCache<ShardKey, ShardAccessor>>,
    capacity: usize,
}

impl AccessorCache {
    pub fn new(capacity: usize, stripe_count: usize) -> Self {
        Self {
            stripes: (0..stripe_count.max(1)).map(|_| AsyncMutex::new(())).collect(),
            entries: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
        }
    }

    /// Stripe index for `key`, from the trailing bytes of its data root.
    pub fn stripe_for(&self, key: &ShardKey) -> usize {
        let tail = match key.to_data_root() {
            Ok(root) => {
                let bytes = root.as_bytes();
                let mut tail = [0u8; 8];
                tail.copy_from_slice(&bytes[bytes.len() - 8..]);
                u64::from_be_bytes(tail)
            }
            // keys outside the store's own layout still need a stripe
            Err(_) => key
                .as_str()
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b))),
        };
        (tail % self.stripes.len() as u64) as usize
    }

    /// Lock the stripe guarding `key`.
    pub async fn lock(&self, key: &ShardKey) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(key)].lock().await
    }

    /// Cached accessor for `key`, marking it most recently used.
    pub fn get(&self, key: &ShardKey) -> Option<ShardAccessor> {
        self.entries
            .lock()
            .expect("accessor cache lock poisoned")
            .get(key)
            .cloned()
    }

    /// Cache `accessor` and return a handle to it, evicting idle entries
    /// while over capacity.
    pub fn insert(&self, key: ShardKey, accessor: ShardAccessor) -> ShardAccessor {
        let handle = accessor.clone();
        let mut evicted = Vec::new();
        {
            let mut entries = self.entries.lock().expect("accessor cache lock poisoned");
            entries.put(key, accessor);
            while entries.len() > self.capacity {
                let idle = entries
                    .iter()
                    .rev()
                    .find(|(_, acc)| acc.handles() == 1)
                    .map(|(k, _)| k.clone());
                match idle.and_then(|k| entries.pop_entry(&k)) {
                    Some(entry) => evicted.push(entry),
                    None => {
                        debug!(
                            len = entries.len(),
                            capacity = self.capacity,
                            "all cached accessors in use; cache over capacity"
                        );
                        break;
                    }
                }
            }
        }
        for (key, accessor) in evicted {
            debug!(key = %key, "evicting cached accessor");
            drop(accessor);
        }
        handle
    }

    /// Drop the cached accessor for `key`, if any.
    pub fn remove(&self, key: &ShardKey) -> bool {
        let removed = self
            .entries
            .lock()
            .expect("accessor cache lock poisoned")
            .pop(key);
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("accessor cache lock poisoned").len()
    }

    /// Drop every cached accessor.
    pub fn clear(&self) {
        let drained: Vec<(ShardKey, ShardAccessor)> = {
            let mut entries = self.entries.lock().expect("accessor cache lock poisoned");
            let mut drained = Vec::with_capacity(entries.len());
            while let Some(entry) = entries.pop_lru() {
                drained.push(entry);
            }
            drained
        };
        drop(drained);
    }
}
