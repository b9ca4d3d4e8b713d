//! Shard container format for the EDS store.
//!
//! A shard is one immutable file: a header listing the roots the shard
//! commits to, followed by length-prefixed block frames. Each block is
//! addressed by its [`ContentId`](eds_types::ContentId).
//!
//! # Architecture
//!
//! - **CarHeader**: magic, version, and root list
//! - **CarWriter**: appends header and frames to any byte sink
//! - **BlockReader**: sequential frame-by-frame reading
//! - **ShardIndex**: fan-out table + sorted identifiers for O(log n) block lookups

pub mod error;
pub mod header;
pub mod index;
pub mod reader;
pub mod writer;

pub use error::{CarError, CarResult};
pub use header::CarHeader;
pub use index::{BlockLocation, ShardIndex};
pub use reader::{prefix_len, Block, BlockReader};
pub use writer::CarWriter;
