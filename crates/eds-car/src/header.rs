use std::io::{Read, Write};

use eds_types::{ContentId, HASH_LEN};

use crate::error::{CarError, CarResult};

pub const CAR_MAGIC: &[u8; 4] = b"EDSC";
pub const CAR_VERSION: u32 = 1;

/// Upper bound on header roots. A 2·W root list for W = 2^15 fits.
pub const MAX_ROOTS: u32 = 1 << 16;

/// Leading section of every shard: the list of roots the shard commits to.
///
/// Layout:
/// ```text
/// [4 bytes: magic "EDSC"]
/// [4 bytes: version (big-endian u32)]
/// [4 bytes: root count (big-endian u32)]
/// [32 bytes per root]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarHeader {
    pub roots: Vec<ContentId>,
}

impl CarHeader {
    pub fn new(roots: Vec<ContentId>) -> Self {
        Self { roots }
    }

    /// Size of the encoded header in bytes.
    pub fn encoded_len(&self) -> usize {
        12 + self.roots.len() * HASH_LEN
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> CarResult<()> {
        w.write_all(CAR_MAGIC)?;
        w.write_all(&CAR_VERSION.to_be_bytes())?;
        w.write_all(&(self.roots.len() as u32).to_be_bytes())?;
        for root in &self.roots {
            w.write_all(root.as_bytes())?;
        }
        Ok(())
    }

    /// Read a header from the start of a stream, leaving the stream
    /// positioned at the first block frame.
    pub fn read_from<R: Read>(r: &mut R) -> CarResult<Self> {
        let mut fixed = [0u8; 12];
        r.read_exact(&mut fixed)?;
        if &fixed[0..4] != CAR_MAGIC {
            return Err(CarError::InvalidMagic {
                expected: String::from_utf8_lossy(CAR_MAGIC).into(),
                actual: String::from_utf8_lossy(&fixed[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        if version != CAR_VERSION {
            return Err(CarError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]);
        if count > MAX_ROOTS {
            return Err(CarError::TooManyRoots(count));
        }

        let mut roots = Vec::with_capacity(count as usize);
        let mut buf = [0u8; HASH_LEN];
        for _ in 0..count {
            r.read_exact(&mut buf)?;
            roots.push(ContentId::from_hash(buf));
        }
        Ok(Self { roots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = CarHeader::new(vec![
            ContentId::from_bytes(b"row"),
            ContentId::from_bytes(b"col"),
        ]);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), header.encoded_len());

        let parsed = CarHeader::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn bad_magic() {
        let mut data = vec![0u8; 12];
        data[0..4].copy_from_slice(b"BADM");
        let err = CarHeader::read_from(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, CarError::InvalidMagic { .. }));
    }

    #[test]
    fn bad_version() {
        let mut data = Vec::new();
        data.extend_from_slice(CAR_MAGIC);
        data.extend_from_slice(&99u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        let err = CarHeader::read_from(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, CarError::UnsupportedVersion(99)));
    }

    #[test]
    fn root_count_is_bounded() {
        let mut data = Vec::new();
        data.extend_from_slice(CAR_MAGIC);
        data.extend_from_slice(&CAR_VERSION.to_be_bytes());
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        let err = CarHeader::read_from(&mut data.as_slice()).unwrap_err();
        assert!(matches!(err, CarError::TooManyRoots(_)));
    }

    #[test]
    fn truncated_roots() {
        let header = CarHeader::new(vec![ContentId::from_bytes(b"a")]);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        let err = CarHeader::read_from(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, CarError::Io(_)));
    }
}
