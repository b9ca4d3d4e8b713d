use std::io::Read;

use eds_types::{ContentId, HASH_LEN};

use crate::error::{CarError, CarResult};
use crate::header::CarHeader;
use crate::reader::BlockReader;

const INDEX_MAGIC: &[u8; 4] = b"EDSI";
const INDEX_VERSION: u32 = 1;

/// Where a block's data lives inside a shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLocation {
    pub offset: u64,
    pub len: u32,
    pub crc32: u32,
}

/// Full index of one shard: every block identifier mapped to its location.
///
/// Layout follows a git-style pack index:
/// - Fan-out table: 256 entries counting identifiers with first byte <= index
/// - Sorted identifier array
/// - CRC32 array (parallel, over block data)
/// - Offset array (parallel)
/// - Length array (parallel)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardIndex {
    fan_out: [u32; 256],
    cids: Vec<ContentId>,
    crc32s: Vec<u32>,
    offsets: Vec<u64>,
    lengths: Vec<u32>,
}

impl ShardIndex {
    /// Build an index from (cid, location) entries. When an identifier
    /// occurs more than once, the first occurrence wins.
    pub fn build(mut entries: Vec<(ContentId, BlockLocation)>) -> Self {
        // stable sort keeps insertion order among equal identifiers
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|later, earlier| later.0 == earlier.0);

        let mut fan_out = [0u32; 256];
        let mut cids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());
        let mut lengths = Vec::with_capacity(entries.len());

        for (cid, loc) in &entries {
            cids.push(*cid);
            crc32s.push(loc.crc32);
            offsets.push(loc.offset);
            lengths.push(loc.len);
        }

        for cid in &cids {
            fan_out[cid.as_bytes()[0] as usize] += 1;
        }
        for i in 1..256 {
            fan_out[i] += fan_out[i - 1];
        }

        Self {
            fan_out,
            cids,
            crc32s,
            offsets,
            lengths,
        }
    }

    /// Scan a whole container and index every block in it.
    pub fn scan<R: Read>(source: R) -> CarResult<(CarHeader, Self)> {
        let mut reader = BlockReader::new(source)?;
        let mut entries = Vec::new();
        while let Some(block) = reader.next_block()? {
            let loc = BlockLocation {
                offset: block.offset,
                len: block.data.len() as u32,
                crc32: crc32fast::hash(&block.data),
            };
            entries.push((block.cid, loc));
        }
        let header = reader.header().clone();
        Ok((header, Self::build(entries)))
    }

    /// Look up a block's location.
    pub fn lookup(&self, cid: &ContentId) -> Option<BlockLocation> {
        let first_byte = cid.as_bytes()[0] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        let range = &self.cids[start..end];
        range.binary_search(cid).ok().map(|pos| {
            let idx = start + pos;
            BlockLocation {
                offset: self.offsets[idx],
                len: self.lengths[idx],
                crc32: self.crc32s[idx],
            }
        })
    }

    pub fn contains(&self, cid: &ContentId) -> bool {
        self.lookup(cid).is_some()
    }

    /// Number of distinct blocks.
    pub fn len(&self) -> usize {
        self.cids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cids.is_empty()
    }

    /// All block identifiers, sorted.
    pub fn cids(&self) -> &[ContentId] {
        &self.cids
    }

    /// Read a block's data out of the full shard bytes, checking its CRC.
    pub fn read_block<'a>(&self, shard: &'a [u8], cid: &ContentId) -> CarResult<Option<&'a [u8]>> {
        let loc = match self.lookup(cid) {
            Some(loc) => loc,
            None => return Ok(None),
        };
        let start = loc.offset as usize;
        let end = start + loc.len as usize;
        if end > shard.len() {
            return Err(CarError::CorruptBlock {
                offset: loc.offset,
                reason: "indexed block extends beyond shard".into(),
            });
        }
        let data = &shard[start..end];
        if crc32fast::hash(data) != loc.crc32 {
            return Err(CarError::CrcMismatch { cid: *cid });
        }
        Ok(Some(data))
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let count = self.cids.len();
        let mut buf = Vec::with_capacity(8 + 256 * 4 + count * (HASH_LEN + 16));
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        for &count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for cid in &self.cids {
            buf.extend_from_slice(cid.as_bytes());
        }
        for &crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        for &offset in &self.offsets {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        for &len in &self.lengths {
            buf.extend_from_slice(&len.to_be_bytes());
        }
        buf
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> CarResult<Self> {
        if data.len() < 8 {
            return Err(CarError::IndexCorrupted("too short".into()));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(CarError::InvalidMagic {
                expected: String::from_utf8_lossy(INDEX_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(data, 4);
        if version != INDEX_VERSION {
            return Err(CarError::UnsupportedVersion(version));
        }

        let mut pos = 8;
        if data.len() < pos + 256 * 4 {
            return Err(CarError::IndexCorrupted("fan-out truncated".into()));
        }
        let mut fan_out = [0u32; 256];
        for entry in &mut fan_out {
            *entry = read_u32(data, pos);
            pos += 4;
        }

        let count = fan_out[255] as usize;
        let needed = pos + count * (HASH_LEN + 4 + 8 + 4);
        if data.len() != needed {
            return Err(CarError::IndexCorrupted(format!(
                "expected {needed} bytes, got {}",
                data.len()
            )));
        }

        let mut cids = Vec::with_capacity(count);
        for _ in 0..count {
            let mut hash = [0u8; HASH_LEN];
            hash.copy_from_slice(&data[pos..pos + HASH_LEN]);
            cids.push(ContentId::from_hash(hash));
            pos += HASH_LEN;
        }

        let mut crc32s = Vec::with_capacity(count);
        for _ in 0..count {
            crc32s.push(read_u32(data, pos));
            pos += 4;
        }

        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[pos..pos + 8]);
            offsets.push(u64::from_be_bytes(raw));
            pos += 8;
        }

        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            lengths.push(read_u32(data, pos));
            pos += 4;
        }

        Ok(Self {
            fan_out,
            cids,
            crc32s,
            offsets,
            lengths,
        })
    }
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::CarWriter;

    fn loc(i: u64) -> BlockLocation {
        BlockLocation {
            offset: i * 100,
            len: i as u32,
            crc32: i as u32 * 7,
        }
    }

    fn make_ids(n: usize) -> Vec<ContentId> {
        (0..n)
            .map(|i| {
                let mut data = [0u8; 32];
                data[0] = (i % 256) as u8;
                data[1] = (i / 256) as u8;
                ContentId::from_hash(data)
            })
            .collect()
    }

    #[test]
    fn build_empty_index() {
        let idx = ShardIndex::build(vec![]);
        assert!(idx.is_empty());
        assert!(idx.fan_out.iter().all(|&c| c == 0));
        assert!(idx.lookup(&ContentId::from_bytes(b"x")).is_none());
    }

    #[test]
    fn build_and_lookup_multiple() {
        let ids = make_ids(300);
        let entries: Vec<_> = ids.iter().enumerate().map(|(i, id)| (*id, loc(i as u64))).collect();
        let idx = ShardIndex::build(entries);
        assert_eq!(idx.len(), 300);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(idx.lookup(id), Some(loc(i as u64)), "lookup {i}");
        }
        assert!(!idx.contains(&ContentId::from_hash([0xFF; 32])));
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let id = ContentId::from_bytes(b"dup");
        let idx = ShardIndex::build(vec![(id, loc(1)), (id, loc(2))]);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.lookup(&id), Some(loc(1)));
    }

    #[test]
    fn serialization_roundtrip() {
        let ids = make_ids(5);
        let entries: Vec<_> = ids.iter().enumerate().map(|(i, id)| (*id, loc(i as u64))).collect();
        let idx = ShardIndex::build(entries);
        let parsed = ShardIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(parsed, idx);
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(matches!(
            ShardIndex::from_bytes(b"BADMxxxxxxxx").unwrap_err(),
            CarError::InvalidMagic { .. }
        ));
        assert!(matches!(
            ShardIndex::from_bytes(b"EDSI").unwrap_err(),
            CarError::IndexCorrupted(_)
        ));
        let mut bytes = ShardIndex::build(vec![(ContentId::from_bytes(b"a"), loc(1))]).to_bytes();
        bytes.pop();
        assert!(matches!(
            ShardIndex::from_bytes(&bytes).unwrap_err(),
            CarError::IndexCorrupted(_)
        ));
    }

    #[test]
    fn scan_indexes_container_and_reads_blocks() {
        let header = CarHeader::new(vec![ContentId::from_bytes(b"root")]);
        let mut writer = CarWriter::new(Vec::new(), &header).unwrap();
        let blocks: Vec<(ContentId, Vec<u8>)> = (0u8..4)
            .map(|i| (ContentId::from_bytes(&[i]), vec![i; 16]))
            .collect();
        for (cid, data) in &blocks {
            writer.put_block(cid, data).unwrap();
        }
        let bytes = writer.into_inner();

        let (parsed_header, idx) = ShardIndex::scan(bytes.as_slice()).unwrap();
        assert_eq!(parsed_header, header);
        assert_eq!(idx.len(), 4);
        for (cid, data) in &blocks {
            assert_eq!(idx.read_block(&bytes, cid).unwrap(), Some(&data[..]));
        }
        assert_eq!(idx.read_block(&bytes, &ContentId::from_bytes(b"nope")).unwrap(), None);
    }

    #[test]
    fn read_block_detects_corruption() {
        let header = CarHeader::new(vec![]);
        let mut writer = CarWriter::new(Vec::new(), &header).unwrap();
        let cid = ContentId::from_bytes(b"x");
        let offset = writer.put_block(&cid, b"payload").unwrap();
        let mut bytes = writer.into_inner();
        let (_, idx) = ShardIndex::scan(bytes.as_slice()).unwrap();

        bytes[offset as usize] ^= 0xFF;
        let err = idx.read_block(&bytes, &cid).unwrap_err();
        assert!(matches!(err, CarError::CrcMismatch { .. }));
    }
}
