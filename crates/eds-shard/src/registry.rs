use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use eds_types::ShardKey;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ShardResult;
use crate::journal::Journal;

/// One durable lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum RegistryRecord {
    Registering { key: ShardKey, path: PathBuf },
    Available { key: ShardKey },
    Errored { key: ShardKey, reason: String },
    Destroyed { key: ShardKey },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PersistedState {
    Registering,
    Available,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PersistedShard {
    pub path: PathBuf,
    pub state: PersistedState,
}

/// Journal of shard lifecycle transitions.
pub(crate) struct Registry {
    journal: Journal<RegistryRecord>,
}

impl Registry {
    pub fn open(path: &Path) -> ShardResult<Self> {
        Ok(Self {
            journal: Journal::open(path)?,
        })
    }

    pub fn record(&self, record: RegistryRecord) -> ShardResult<()> {
        self.journal.append(&record)
    }

    /// Fold the journal into the last known state of every live shard.
    pub fn recover(&self) -> ShardResult<BTreeMap<ShardKey, PersistedShard>> {
        let mut shards = BTreeMap::new();
        for record in self.journal.recover()? {
            match record {
                RegistryRecord::Registering { key, path } => {
                    shards.insert(
                        key,
                        PersistedShard {
                            path,
                            state: PersistedState::Registering,
                        },
                    );
                }
                RegistryRecord::Available { key } => {
                    set_state(&mut shards, key, PersistedState::Available)
                }
                RegistryRecord::Errored { key, reason } => {
                    set_state(&mut shards, key, PersistedState::Errored(reason))
                }
                RegistryRecord::Destroyed { key } => {
                    shards.remove(&key);
                }
            }
        }
        Ok(shards)
    }

    /// Rewrite the journal so it holds exactly `shards`.
    pub fn compact<'a>(
        &self,
        shards: impl IntoIterator<Item = (&'a ShardKey, &'a PersistedShard)>,
    ) -> ShardResult<()> {
        let mut records = Vec::new();
        for (key, shard) in shards {
            records.push(RegistryRecord::Registering {
                key: key.clone(),
                path: shard.path.clone(),
            });
            match &shard.state {
                PersistedState::Registering => {}
                PersistedState::Available => {
                    records.push(RegistryRecord::Available { key: key.clone() })
                }
                PersistedState::Errored(reason) => records.push(RegistryRecord::Errored {
                    key: key.clone(),
                    reason: reason.clone(),
                }),
            }
        }
        self.journal.compact(&records)
    }
}

fn set_state(
    shards: &mut BTreeMap<ShardKey, PersistedShard>,
    key: ShardKey,
    state: PersistedState,
) {
    match shards.get_mut(&key) {
        Some(shard) => shard.state = state,
        None => warn!(key = %key, "registry transition for unregistered shard; ignoring"),
    }
}
