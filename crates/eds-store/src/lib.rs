//! # eds-store
//!
//! Shard-based content-addressed store for extended data squares.
//!
//! Each square lives in its own shard file under `blocks/`, named by its
//! data root. The [`Store`] facade encodes squares into shards, registers
//! them with the shard lifecycle manager, and serves them back through a
//! striped cache of open accessors. Every block is also reachable by
//! content id through [`Store::blockstore`].

mod cache;
mod tracker;

pub mod blockstore;
pub mod config;
pub mod context;
pub mod error;
pub mod store;

pub use blockstore::{ReadBlockstore, StoreBlockstore};
pub use config::StoreConfig;
pub use context::{CancelHandle, Context};
pub use error::{StoreError, StoreResult};
pub use store::Store;

pub use eds_shard::{GcOutcome, GcResult, ShardBlockstore, ShardReader};
