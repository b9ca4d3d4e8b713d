use eds_shard::ShardError;
use eds_square::SquareError;
use eds_types::{ContentId, DataRoot, ShardKey, TypeError};
use thiserror::Error;

/// Errors reported by the [`Store`](crate::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A square with this root is already stored. Callers may treat this
    /// as success.
    #[error("square already exists: {0}")]
    AlreadyExists(DataRoot),

    #[error("square not found: {0}")]
    NotFound(DataRoot),

    #[error("block not found: {0}")]
    BlockNotFound(ContentId),

    /// Stored data does not hash to the requested root.
    #[error("content integrity mismatch for {root}: stored data hashes to {computed}")]
    IntegrityMismatch { root: DataRoot, computed: DataRoot },

    /// Underlying I/O failure.
    #[error("{op} {key}: {source}")]
    Resource {
        op: &'static str,
        key: ShardKey,
        #[source]
        source: std::io::Error,
    },

    /// The caller's context finished before the result arrived. The
    /// operation itself may still complete.
    #[error("{op} {key}: cancelled")]
    Cancelled { op: &'static str, key: ShardKey },

    /// Registration could not index the shard; it stays errored until removed.
    #[error("indexing shard {key} failed: {reason}")]
    IndexingFailed { key: ShardKey, reason: String },

    /// The shard exists but is errored.
    #[error("shard {key} is errored: {reason}")]
    Errored { key: ShardKey, reason: String },

    #[error("registry holds a key that is not a data root: {0}")]
    InvalidKey(#[from] TypeError),

    #[error("store has not been started")]
    NotStarted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("square error: {0}")]
    Square(#[from] SquareError),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(self, Self::IntegrityMismatch { .. })
    }

    /// Attach operation context to a lifecycle error.
    pub(crate) fn from_shard(op: &'static str, root: &DataRoot, err: ShardError) -> Self {
        match err {
            ShardError::Unknown(_) => Self::NotFound(*root),
            ShardError::AlreadyExists(_) => Self::AlreadyExists(*root),
            ShardError::IndexingFailed { key, reason } => Self::IndexingFailed { key, reason },
            ShardError::Errored { key, reason } => Self::Errored { key, reason },
            ShardError::Io(source) => Self::Resource {
                op,
                key: root.into(),
                source,
            },
            other => Self::Shard(other),
        }
    }

    /// Attach operation context to a codec error.
    pub(crate) fn from_square(op: &'static str, root: &DataRoot, err: SquareError) -> Self {
        match err {
            SquareError::IntegrityMismatch { computed, .. } => Self::IntegrityMismatch {
                root: *root,
                computed,
            },
            SquareError::Io(source) => Self::Resource {
                op,
                key: root.into(),
                source,
            },
            other => Self::Square(other),
        }
    }

    pub(crate) fn io(op: &'static str, root: &DataRoot, source: std::io::Error) -> Self {
        Self::Resource {
            op,
            key: root.into(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
