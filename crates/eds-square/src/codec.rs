use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;

use eds_car::{BlockReader, CarHeader, CarWriter};
use eds_crypto::{ContentHasher, MerkleTree};
use eds_types::{ContentId, DataRoot};
use tracing::debug;

use crate::dah::DataAvailabilityHeader;
use crate::error::{SquareError, SquareResult};
use crate::extend::{Extender, XorExtender};
use crate::square::ExtendedSquare;

/// Number of leading frames holding the original-data quadrant of a square
/// of the given width.
pub fn ods_block_count(width: usize) -> usize {
    let k = width / 2;
    k * k
}

/// Encode a square into a shard container.
///
/// Frame order:
/// 1. original quadrant shares, row-major (always `(W/2)²` frames)
/// 2. every other share, row-major
/// 3. inner nodes of the row trees, then of the column trees
///
/// Frames after the first section are deduplicated by identifier.
pub fn write_eds<W: Write>(eds: &ExtendedSquare, sink: W) -> SquareResult<W> {
    let w = eds.width();
    let k = w / 2;
    let leaves = eds.leaf_ids();
    let (rows, cols) = eds.trees();
    let dah = DataAvailabilityHeader::new(
        rows.iter().map(MerkleTree::root).collect(),
        cols.iter().map(MerkleTree::root).collect(),
    );

    let mut writer = CarWriter::new(sink, &CarHeader::new(dah.roots()))?;
    let mut seen: HashSet<ContentId> = HashSet::with_capacity(w * w * 2);

    for r in 0..k {
        for c in 0..k {
            let idx = r * w + c;
            writer.put_block(&leaves[idx], eds.cell(r, c))?;
            seen.insert(leaves[idx]);
        }
    }

    for r in 0..w {
        for c in 0..w {
            if r < k && c < k {
                continue;
            }
            let idx = r * w + c;
            if seen.insert(leaves[idx]) {
                writer.put_block(&leaves[idx], eds.cell(r, c))?;
            }
        }
    }

    for tree in rows.iter().chain(&cols) {
        for node in tree.inner_nodes() {
            if seen.insert(node.id) {
                writer.put_block(&node.id, &node.data)?;
            }
        }
    }

    debug!(
        width = w,
        blocks = writer.block_count(),
        bytes = writer.offset(),
        "encoded square"
    );
    Ok(writer.into_inner())
}

/// Parse only the header of an encoded square.
pub fn read_dah<R: Read>(mut source: R) -> SquareResult<DataAvailabilityHeader> {
    let header = CarHeader::read_from(&mut source)?;
    DataAvailabilityHeader::from_roots(&header.roots)
}

/// Decodes shard containers back into squares.
#[derive(Clone)]
pub struct EdsCodec {
    extender: Arc<dyn Extender>,
}

impl Default for EdsCodec {
    fn default() -> Self {
        Self::new(Arc::new(XorExtender))
    }
}

impl std::fmt::Debug for EdsCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdsCodec").finish_non_exhaustive()
    }
}

impl EdsCodec {
    pub fn new(extender: Arc<dyn Extender>) -> Self {
        Self { extender }
    }

    pub fn extender(&self) -> &dyn Extender {
        self.extender.as_ref()
    }

    /// Extend an original data square with this codec's extender.
    pub fn compute(&self, ods: Vec<Vec<u8>>) -> SquareResult<ExtendedSquare> {
        ExtendedSquare::compute(ods, self.extender.as_ref())
    }

    /// Decode a square from its container.
    ///
    /// Only the header and the original quadrant are read. The rest of the
    /// square is re-derived, and the resulting roots must match both the
    /// header and `expected`.
    pub fn read_eds<R: Read>(&self, source: R, expected: &DataRoot) -> SquareResult<ExtendedSquare> {
        let mut reader = BlockReader::new(source)?;
        let stored = DataAvailabilityHeader::from_roots(&reader.header().roots)?;
        let count = ods_block_count(stored.square_width());

        let mut ods = Vec::with_capacity(count);
        for index in 0..count {
            let block = reader.next_block()?.ok_or_else(|| SquareError::CorruptShare {
                index,
                reason: "container ends inside the original quadrant".into(),
            })?;
            if !ContentHasher::LEAF.verify(&block.data, &block.cid) {
                return Err(SquareError::CorruptShare {
                    index,
                    reason: format!("data does not hash to {}", block.cid),
                });
            }
            ods.push(block.data);
        }

        let eds = self.compute(ods)?;
        let computed = eds.data_root();
        if computed != *expected {
            return Err(SquareError::IntegrityMismatch {
                expected: *expected,
                computed,
            });
        }
        let stored_root = stored.hash();
        if stored_root != computed {
            return Err(SquareError::IntegrityMismatch {
                expected: stored_root,
                computed,
            });
        }

        debug!(width = eds.width(), root = %computed.short_hex(), "decoded square");
        Ok(eds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edstest::random_eds;
    use eds_car::{prefix_len, ShardIndex};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample(k: usize) -> ExtendedSquare {
        random_eds(k, 16, &mut StdRng::seed_from_u64(k as u64))
    }

    #[test]
    fn header_lists_two_w_roots() {
        let eds = sample(2);
        let bytes = write_eds(&eds, Vec::new()).unwrap();
        let dah = read_dah(bytes.as_slice()).unwrap();
        assert_eq!(dah.roots().len(), 2 * eds.width());
        assert_eq!(dah, eds.dah());
        assert_eq!(dah.hash(), eds.data_root());
    }

    #[test]
    fn roundtrip_from_full_container() {
        let eds = sample(4);
        let bytes = write_eds(&eds, Vec::new()).unwrap();
        let decoded = EdsCodec::default().read_eds(bytes.as_slice(), &eds.data_root()).unwrap();
        assert_eq!(decoded.flattened(), eds.flattened());
    }

    #[test]
    fn roundtrip_from_quadrant_prefix() {
        let eds = sample(2);
        let bytes = write_eds(&eds, Vec::new()).unwrap();
        let end = prefix_len(&bytes, ods_block_count(eds.width())).unwrap();
        let decoded = EdsCodec::default().read_eds(&bytes[..end], &eds.data_root()).unwrap();
        assert_eq!(decoded, eds);
    }

    #[test]
    fn container_indexes_every_leaf_and_node() {
        let eds = sample(2);
        let bytes = write_eds(&eds, Vec::new()).unwrap();
        let (_, index) = ShardIndex::scan(bytes.as_slice()).unwrap();
        for leaf in eds.leaf_ids() {
            assert!(index.contains(&leaf));
        }
        let (rows, cols) = eds.trees();
        for tree in rows.iter().chain(&cols) {
            for node in tree.inner_nodes() {
                assert_eq!(index.read_block(&bytes, &node.id).unwrap(), Some(&node.data[..]));
            }
        }
    }

    #[test]
    fn wrong_expected_root_is_integrity_mismatch() {
        let eds = sample(2);
        let bytes = write_eds(&eds, Vec::new()).unwrap();
        let other = DataRoot::from_hash([7u8; 32]);
        let err = EdsCodec::default().read_eds(bytes.as_slice(), &other).unwrap_err();
        assert!(matches!(err, SquareError::IntegrityMismatch { .. }));
    }

    #[test]
    fn tampered_header_is_integrity_mismatch() {
        let eds = sample(2);
        let mut bytes = write_eds(&eds, Vec::new()).unwrap();
        // first root starts right after magic, version and root count
        bytes[12] ^= 0xFF;
        let err = EdsCodec::default().read_eds(bytes.as_slice(), &eds.data_root()).unwrap_err();
        assert!(matches!(err, SquareError::IntegrityMismatch { .. }));
        assert_ne!(read_dah(bytes.as_slice()).unwrap().hash(), eds.data_root());
    }

    #[test]
    fn tampered_share_is_detected() {
        let eds = sample(2);
        let mut bytes = write_eds(&eds, Vec::new()).unwrap();
        let end = prefix_len(&bytes, 1).unwrap();
        bytes[end - 1] ^= 0x01;
        let err = EdsCodec::default().read_eds(bytes.as_slice(), &eds.data_root()).unwrap_err();
        assert!(matches!(err, SquareError::CorruptShare { index: 0, .. }));
    }

    #[test]
    fn truncated_quadrant_is_corrupt() {
        let eds = sample(2);
        let bytes = write_eds(&eds, Vec::new()).unwrap();
        let end = prefix_len(&bytes, 3).unwrap();
        let err = EdsCodec::default().read_eds(&bytes[..end], &eds.data_root()).unwrap_err();
        assert!(matches!(err, SquareError::CorruptShare { index: 3, .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn encode_decode_preserves_shares(seed in any::<u64>(), k_exp in 0u32..3, share_size in 1usize..48) {
            let k = 1usize << k_exp;
            let eds = random_eds(k, share_size, &mut StdRng::seed_from_u64(seed));
            let bytes = write_eds(&eds, Vec::new()).unwrap();
            let decoded = EdsCodec::default().read_eds(bytes.as_slice(), &eds.data_root()).unwrap();
            prop_assert_eq!(decoded.flattened(), eds.flattened());
        }
    }
}
