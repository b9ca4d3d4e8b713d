//! Hashing primitives for the EDS store.
//!
//! Provides domain-separated BLAKE3 hashing and binary Merkle trees. Every
//! block identifier in a shard (share leaves and inner nodes) and every data
//! root is produced here.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod hasher;
pub mod merkle;

pub use hasher::ContentHasher;
pub use merkle::{hash_pair, InnerNode, MerkleTree};
