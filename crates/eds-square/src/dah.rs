use eds_crypto::{ContentHasher, MerkleTree};
use eds_types::{ContentId, DataRoot};

use crate::error::{SquareError, SquareResult};

/// Row and column roots of an extended square.
///
/// The hash of the header is the square's [`DataRoot`]: a Merkle root over
/// the 2·W roots, rows first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataAvailabilityHeader {
    pub row_roots: Vec<ContentId>,
    pub column_roots: Vec<ContentId>,
}

impl DataAvailabilityHeader {
    pub fn new(row_roots: Vec<ContentId>, column_roots: Vec<ContentId>) -> Self {
        Self {
            row_roots,
            column_roots,
        }
    }

    /// Split a flat root list (rows then columns) back into a header.
    pub fn from_roots(roots: &[ContentId]) -> SquareResult<Self> {
        let width = roots.len() / 2;
        if roots.len() % 2 != 0 || width < 2 || !width.is_power_of_two() {
            return Err(SquareError::InvalidRootCount(roots.len()));
        }
        Ok(Self {
            row_roots: roots[..width].to_vec(),
            column_roots: roots[width..].to_vec(),
        })
    }

    /// Width of the extended square this header describes.
    pub fn square_width(&self) -> usize {
        self.row_roots.len()
    }

    /// All roots, rows first then columns.
    pub fn roots(&self) -> Vec<ContentId> {
        self.row_roots
            .iter()
            .chain(&self.column_roots)
            .copied()
            .collect()
    }

    pub fn hash(&self) -> DataRoot {
        let leaves = self
            .row_roots
            .iter()
            .chain(&self.column_roots)
            .map(|root| ContentHasher::DAH.hash(root.as_bytes()))
            .collect();
        DataRoot::from_hash(*MerkleTree::from_leaves(leaves).root().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots(n: u8) -> Vec<ContentId> {
        (0..n).map(|i| ContentId::from_bytes(&[i])).collect()
    }

    #[test]
    fn from_roots_splits_rows_and_columns() {
        let all = roots(8);
        let dah = DataAvailabilityHeader::from_roots(&all).unwrap();
        assert_eq!(dah.square_width(), 4);
        assert_eq!(dah.row_roots, all[..4]);
        assert_eq!(dah.column_roots, all[4..]);
        assert_eq!(dah.roots(), all);
    }

    #[test]
    fn from_roots_rejects_bad_counts() {
        for n in [0u8, 1, 2, 3, 6, 12] {
            assert!(
                DataAvailabilityHeader::from_roots(&roots(n)).is_err(),
                "{n} roots should be rejected"
            );
        }
    }

    #[test]
    fn hash_depends_on_order() {
        let all = roots(4);
        let dah = DataAvailabilityHeader::from_roots(&all).unwrap();
        let swapped = DataAvailabilityHeader::new(dah.column_roots.clone(), dah.row_roots.clone());
        assert_ne!(dah.hash(), swapped.hash());
        assert_eq!(dah.hash(), DataAvailabilityHeader::from_roots(&all).unwrap().hash());
    }
}
