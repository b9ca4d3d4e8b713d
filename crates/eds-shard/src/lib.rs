//! # eds-shard
//!
//! Shard lifecycle management: the byte sources behind shards, the durable
//! registry of shard states, the inverted block index shared by all shards,
//! and the reference-counted accessors handed to readers.

pub mod accessor;
pub mod block_index;
pub mod error;
pub mod gc;
pub mod index_repo;
mod journal;
pub mod manager;
pub mod mount;
mod registry;
mod shard;

pub use accessor::{ShardAccessor, ShardBlockstore, ShardReader};
pub use block_index::BlockIndex;
pub use error::{ShardError, ShardResult};
pub use gc::{GcOutcome, GcResult};
pub use index_repo::FsIndexRepo;
pub use manager::{ManagerConfig, Pending, ShardManager};
pub use mount::{FileMount, InMemoryOnceMount, Mount, ShardBytes};
pub use shard::{ShardInfo, ShardState};
