//! Foundation types for the EDS store.
//!
//! Every other crate in the workspace depends on `eds-types`.
//!
//! # Key Types
//!
//! - [`DataRoot`]: 32-byte hash identifying an extended data square
//! - [`ContentId`]: 32-byte hash identifying a single block (share or Merkle node)
//! - [`ShardKey`]: canonical hex encoding of a [`DataRoot`], used as the shard name

pub mod error;
pub mod hash;
pub mod key;

pub use error::TypeError;
pub use hash::{ContentId, DataRoot, HASH_LEN};
pub use key::ShardKey;
