use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length in bytes of every hash used by the store.
pub const HASH_LEN: usize = 32;

fn decode_hash(s: &str) -> Result<[u8; HASH_LEN], TypeError> {
    let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
    copy_hash(&bytes)
}

fn copy_hash(bytes: &[u8]) -> Result<[u8; HASH_LEN], TypeError> {
    if bytes.len() != HASH_LEN {
        return Err(TypeError::InvalidLength {
            expected: HASH_LEN,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; HASH_LEN];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

/// Hash identifying an extended data square.
///
/// A `DataRoot` is derived from the Merkle roots of the square's rows and
/// columns. It doubles as the storage key of the square's shard: the shard
/// is named by the root's lowercase hex encoding (see [`crate::ShardKey`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataRoot([u8; HASH_LEN]);

impl DataRoot {
    /// Create a `DataRoot` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; HASH_LEN]) -> Self {
        Self(hash)
    }

    /// Create a `DataRoot` from a byte slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        copy_hash(bytes).map(Self)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_hash(s).map(Self)
    }
}

impl fmt::Debug for DataRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataRoot({})", self.short_hex())
    }
}

impl fmt::Display for DataRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; HASH_LEN]> for DataRoot {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<DataRoot> for [u8; HASH_LEN] {
    fn from(root: DataRoot) -> Self {
        root.0
    }
}

/// Content identifier of a single block inside a shard.
///
/// Blocks are either share leaves or inner Merkle nodes; either way the
/// identifier is the domain-separated BLAKE3 hash that names the block in
/// the Merkle structure of the square.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId([u8; HASH_LEN]);

impl ContentId {
    /// Compute a `ContentId` as the plain BLAKE3 hash of raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create a `ContentId` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; HASH_LEN]) -> Self {
        Self(hash)
    }

    /// Create a `ContentId` from a byte slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        copy_hash(bytes).map(Self)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_hash(s).map(Self)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; HASH_LEN]> for ContentId {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_root_hex_roundtrip() {
        let root = DataRoot::from_hash([0xAB; 32]);
        let hex = root.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(DataRoot::from_hex(&hex).unwrap(), root);
    }

    #[test]
    fn data_root_rejects_wrong_length() {
        let err = DataRoot::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn data_root_rejects_bad_hex() {
        let err = DataRoot::from_hex("zz").unwrap_err();
        assert!(matches!(err, TypeError::InvalidHex(_)));
    }

    #[test]
    fn short_hex_is_8_chars() {
        let root = DataRoot::from_hash([7; 32]);
        assert_eq!(root.short_hex(), "07070707");
    }

    #[test]
    fn content_id_from_bytes_is_deterministic() {
        assert_eq!(ContentId::from_bytes(b"share"), ContentId::from_bytes(b"share"));
        assert_ne!(ContentId::from_bytes(b"a"), ContentId::from_bytes(b"b"));
    }

    #[test]
    fn content_id_from_slice() {
        let id = ContentId::from_slice(&[1u8; 32]).unwrap();
        assert_eq!(id.as_bytes(), &[1u8; 32]);
        assert!(ContentId::from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let root = DataRoot::from_hash([3; 32]);
        let json = serde_json::to_string(&root).unwrap();
        let parsed: DataRoot = serde_json::from_str(&json).unwrap();
        assert_eq!(root, parsed);
    }

    proptest::proptest! {
        #[test]
        fn any_hash_survives_hex(bytes in proptest::array::uniform32(0u8..)) {
            let id = ContentId::from_hash(bytes);
            proptest::prop_assert_eq!(ContentId::from_hex(&id.to_hex()).unwrap(), id);
        }
    }
}
