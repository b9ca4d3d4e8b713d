use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::RwLock;

use eds_types::{ContentId, ShardKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ShardResult;
use crate::journal::Journal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IndexRecord {
    Add { key: ShardKey, cids: Vec<ContentId> },
    Drop { key: ShardKey },
}

#[derive(Default)]
struct IndexMaps {
    by_cid: HashMap<ContentId, BTreeSet<ShardKey>>,
    by_key: HashMap<ShardKey, Vec<ContentId>>,
}

impl IndexMaps {
    fn apply(&mut self, record: IndexRecord) {
        match record {
            IndexRecord::Add { key, cids } => {
                self.drop_key(&key);
                for cid in &cids {
                    self.by_cid.entry(*cid).or_default().insert(key.clone());
                }
                self.by_key.insert(key, cids);
            }
            IndexRecord::Drop { key } => {
                self.drop_key(&key);
            }
        }
    }

    fn drop_key(&mut self, key: &ShardKey) -> bool {
        let Some(cids) = self.by_key.remove(key) else {
            return false;
        };
        for cid in cids {
            if let Some(keys) = self.by_cid.get_mut(&cid) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_cid.remove(&cid);
                }
            }
        }
        true
    }
}

/// Inverted index from block identifier to the shards holding that block.
///
/// Every mutation is a single journal record, so an `add` is either fully
/// visible after a crash or not at all.
pub struct BlockIndex {
    journal: Journal<IndexRecord>,
    maps: RwLock<IndexMaps>,
}

impl BlockIndex {
    /// Open the index, replaying its journal.
    pub fn open(path: &Path) -> ShardResult<Self> {
        let journal = Journal::open(path)?;
        let mut maps = IndexMaps::default();
        for record in journal.recover()? {
            maps.apply(record);
        }
        info!(
            path = %path.display(),
            shards = maps.by_key.len(),
            blocks = maps.by_cid.len(),
            "block index opened"
        );
        Ok(Self {
            journal,
            maps: RwLock::new(maps),
        })
    }

    /// Record that `key` holds every block in `cids`.
    pub fn add(&self, key: &ShardKey, cids: Vec<ContentId>) -> ShardResult<()> {
        let count = cids.len();
        let record = IndexRecord::Add {
            key: key.clone(),
            cids,
        };
        self.journal.append(&record)?;
        self.maps.write().expect("block index lock poisoned").apply(record);
        debug!(key = %key, blocks = count, "block index add");
        Ok(())
    }

    /// Shards holding `cid`, in key order.
    pub fn lookup(&self, cid: &ContentId) -> Vec<ShardKey> {
        self.maps
            .read()
            .expect("block index lock poisoned")
            .by_cid
            .get(cid)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every entry referencing `key`. Returns whether anything was
    /// dropped.
    pub fn drop_all(&self, key: &ShardKey) -> ShardResult<bool> {
        if !self
            .maps
            .read()
            .expect("block index lock poisoned")
            .by_key
            .contains_key(key)
        {
            return Ok(false);
        }
        self.journal.append(&IndexRecord::Drop { key: key.clone() })?;
        let dropped = self
            .maps
            .write()
            .expect("block index lock poisoned")
            .drop_key(key);
        debug!(key = %key, dropped, "block index drop");
        Ok(dropped)
    }

    /// Whether any block of `key` is indexed.
    pub fn contains_shard(&self, key: &ShardKey) -> bool {
        self.maps
            .read()
            .expect("block index lock poisoned")
            .by_key
            .contains_key(key)
    }

    /// Number of distinct indexed blocks.
    pub fn block_count(&self) -> usize {
        self.maps.read().expect("block index lock poisoned").by_cid.len()
    }

    /// Rewrite the journal as one `Add` per live shard.
    pub fn compact(&self) -> ShardResult<()> {
        let maps = self.maps.read().expect("block index lock poisoned");
        let mut keys: Vec<&ShardKey> = maps.by_key.keys().collect();
        keys.sort();
        let records: Vec<IndexRecord> = keys
            .into_iter()
            .map(|key| IndexRecord::Add {
                key: key.clone(),
                cids: maps.by_key[key].clone(),
            })
            .collect();
        self.journal.compact(&records)
    }
}
