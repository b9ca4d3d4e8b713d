use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::DataRoot;

/// Name of a shard in the lifecycle registry.
///
/// The key space is flat: a shard key is the lowercase hex encoding of the
/// square's [`DataRoot`]. Keys that do not decode back into a root can exist
/// in the registry (they are only strings there) but are rejected when the
/// store lists its squares.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardKey(String);

impl ShardKey {
    /// Wrap an arbitrary key string.
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the key back into the data root it names.
    pub fn to_data_root(&self) -> Result<DataRoot, TypeError> {
        DataRoot::from_hex(&self.0)
    }
}

impl From<&DataRoot> for ShardKey {
    fn from(root: &DataRoot) -> Self {
        Self(root.to_hex())
    }
}

impl From<DataRoot> for ShardKey {
    fn from(root: DataRoot) -> Self {
        Self(root.to_hex())
    }
}

impl fmt::Debug for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardKey({})", self.0)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
