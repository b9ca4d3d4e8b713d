use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use eds_types::ShardKey;
use tracing::debug;

use crate::shard::Shard;

/// What a GC pass did to one shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GcOutcome {
    /// Transient state was found and removed.
    Reclaimed,
    /// Nothing to reclaim.
    Clean,
    /// Reclamation failed; the shard itself is untouched.
    Failed(String),
}

/// Per-shard outcomes of one GC pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcResult {
    pub shards: HashMap<ShardKey, GcOutcome>,
}

impl GcResult {
    pub fn reclaimed(&self) -> usize {
        self.shards
            .values()
            .filter(|o| matches!(o, GcOutcome::Reclaimed))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ShardKey, &str)> {
        self.shards.iter().filter_map(|(key, outcome)| match outcome {
            GcOutcome::Failed(reason) => Some((key, reason.as_str())),
            _ => None,
        })
    }
}

/// Reclaim transient state of one idle shard: its scratch entry under
/// `transients` and any buffer its mount still holds. The durable shard
/// file is never touched.
pub(crate) fn sweep(transients: &Path, shard: &Shard) -> GcOutcome {
    let released = shard.mount.release();
    match remove_transient(&transients.join(shard.key.as_str())) {
        Ok(removed) if removed || released => {
            debug!(key = %shard.key, removed, released, "reclaimed transient state");
            GcOutcome::Reclaimed
        }
        Ok(_) => GcOutcome::Clean,
        Err(e) => GcOutcome::Failed(e.to_string()),
    }
}

fn remove_transient(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map(|_| true),
        Ok(_) => fs::remove_file(path).map(|_| true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
