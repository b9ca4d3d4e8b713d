use std::path::{Path, PathBuf};
use std::time::Duration;

use eds_shard::ManagerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

pub const BLOCKS_DIR: &str = "blocks";
pub const INDEX_DIR: &str = "index";
pub const TRANSIENTS_DIR: &str = "transients";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_path: PathBuf,
    /// Seconds between background GC passes; 0 disables the loop.
    pub gc_interval_secs: u64,
    /// Maximum number of cached shard accessors.
    pub cache_size: usize,
    /// Number of lock stripes guarding accessor acquisition.
    pub stripe_count: usize,
    pub register_track_secs: u64,
    pub acquire_track_secs: u64,
    /// How long a removal waits for outstanding accessors to be released.
    ///
    /// Removal holds the key's lock stripe for this whole wait, so puts and
    /// acquisitions of every other key on the same stripe stall with it.
    /// Raising `stripe_count` narrows how many keys share that stall.
    pub destroy_drain_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            gc_interval_secs: 0,
            cache_size: 128,
            stripe_count: 256,
            register_track_secs: 300,
            acquire_track_secs: 60,
            destroy_drain_secs: 60,
        }
    }
}

impl StoreConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::Config(format!(
            "reading {}: {e}",
            path.display()
        )))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.cache_size == 0 {
            return Err(StoreError::Config("cache_size must be at least 1".into()));
        }
        if self.stripe_count == 0 {
            return Err(StoreError::Config("stripe_count must be at least 1".into()));
        }
        Ok(())
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.base_path.join(BLOCKS_DIR)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.base_path.join(INDEX_DIR)
    }

    pub fn transients_dir(&self) -> PathBuf {
        self.base_path.join(TRANSIENTS_DIR)
    }

    pub fn gc_interval(&self) -> Option<Duration> {
        match self.gc_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            index_dir: self.index_dir(),
            transients_dir: self.transients_dir(),
            drain_timeout: Duration::from_secs(self.destroy_drain_secs),
        }
    }
}
