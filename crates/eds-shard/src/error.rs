use eds_car::CarError;
use eds_types::ShardKey;
use thiserror::Error;

/// Errors from the shard lifecycle manager and its components.
#[derive(Debug, Error)]
pub enum ShardError {
    /// A shard with this key is already registered, in any state.
    #[error("shard already exists: {0}")]
    AlreadyExists(ShardKey),

    /// The key was never registered or has been destroyed.
    #[error("shard unknown: {0}")]
    Unknown(ShardKey),

    /// The shard is being destroyed and accepts no new acquisitions.
    #[error("shard is being destroyed: {0}")]
    Destroying(ShardKey),

    /// Outstanding accessors did not drain before the timeout.
    #[error("shard {key} still has {refs} active accessor(s)")]
    Busy { key: ShardKey, refs: usize },

    /// The shard failed registration and is unusable until removed.
    #[error("shard {key} is errored: {reason}")]
    Errored { key: ShardKey, reason: String },

    /// The mount could not be read or parsed during registration.
    #[error("indexing shard {key} failed: {reason}")]
    IndexingFailed { key: ShardKey, reason: String },

    /// The manager has been closed.
    #[error("shard manager is closed")]
    Closed,

    /// A journal record could not be encoded or decoded.
    #[error("journal error: {0}")]
    Journal(String),

    #[error("container error: {0}")]
    Car(#[from] CarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for shard operations.
pub type ShardResult<T> = Result<T, ShardError>;
