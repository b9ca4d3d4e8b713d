use eds_crypto::{ContentHasher, MerkleTree};
use eds_types::{ContentId, DataRoot};

use crate::dah::DataAvailabilityHeader;
use crate::error::{SquareError, SquareResult};
use crate::extend::Extender;

/// A 2-D erasure-coded matrix of fixed-size shares.
///
/// Shares are stored row-major. The width `W` is a power of two and at
/// least 2; the top-left `W/2 × W/2` quadrant holds the original data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedSquare {
    width: usize,
    share_size: usize,
    shares: Vec<Vec<u8>>,
}

impl ExtendedSquare {
    /// Wrap an already-extended square given as `W²` row-major shares.
    pub fn from_shares(shares: Vec<Vec<u8>>) -> SquareResult<Self> {
        let width = square_width(shares.len())?;
        if width < 2 {
            return Err(SquareError::InvalidWidth(width));
        }
        let share_size = check_share_sizes(&shares)?;
        Ok(Self {
            width,
            share_size,
            shares,
        })
    }

    /// Extend an original data square (`k²` row-major shares, `k` a power
    /// of two) into a `2k × 2k` square.
    pub fn compute(ods: Vec<Vec<u8>>, extender: &dyn Extender) -> SquareResult<Self> {
        let k = square_width(ods.len())?;
        let share_size = check_share_sizes(&ods)?;
        let width = 2 * k;

        let mut grid: Vec<Vec<Vec<u8>>> = vec![Vec::with_capacity(width); width];
        let mut ods = ods.into_iter();
        for row in grid.iter_mut().take(k) {
            row.extend(ods.by_ref().take(k));
            let half: Vec<&[u8]> = row.iter().map(Vec::as_slice).collect();
            let parity = extender.extend(&half);
            row.extend(parity);
        }

        for col in 0..width {
            let half: Vec<&[u8]> = (0..k).map(|r| grid[r][col].as_slice()).collect();
            let parity = extender.extend(&half);
            for (i, share) in parity.into_iter().enumerate() {
                grid[k + i].push(share);
            }
        }

        let shares: Vec<Vec<u8>> = grid.into_iter().flatten().collect();
        check_share_sizes(&shares)?;
        Ok(Self {
            width,
            share_size,
            shares,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn share_size(&self) -> usize {
        self.share_size
    }

    pub fn cell(&self, row: usize, col: usize) -> &[u8] {
        &self.shares[row * self.width + col]
    }

    pub fn row(&self, row: usize) -> Vec<&[u8]> {
        (0..self.width).map(|c| self.cell(row, c)).collect()
    }

    pub fn col(&self, col: usize) -> Vec<&[u8]> {
        (0..self.width).map(|r| self.cell(r, col)).collect()
    }

    /// Every share, row-major.
    pub fn flattened(&self) -> &[Vec<u8>] {
        &self.shares
    }

    /// Shares of the original data quadrant, row-major.
    pub fn flattened_ods(&self) -> Vec<&[u8]> {
        let k = self.width / 2;
        (0..k)
            .flat_map(|r| (0..k).map(move |c| (r, c)))
            .map(|(r, c)| self.cell(r, c))
            .collect()
    }

    /// Leaf identifiers of every share, row-major.
    pub fn leaf_ids(&self) -> Vec<ContentId> {
        self.shares
            .iter()
            .map(|share| ContentHasher::LEAF.hash(share))
            .collect()
    }

    /// Merkle trees of every row, then every column.
    pub fn trees(&self) -> (Vec<MerkleTree>, Vec<MerkleTree>) {
        let leaves = self.leaf_ids();
        let w = self.width;
        let rows = (0..w)
            .map(|r| MerkleTree::from_leaves(leaves[r * w..(r + 1) * w].to_vec()))
            .collect();
        let cols = (0..w)
            .map(|c| MerkleTree::from_leaves((0..w).map(|r| leaves[r * w + c]).collect()))
            .collect();
        (rows, cols)
    }

    pub fn dah(&self) -> DataAvailabilityHeader {
        let (rows, cols) = self.trees();
        DataAvailabilityHeader::new(
            rows.iter().map(MerkleTree::root).collect(),
            cols.iter().map(MerkleTree::root).collect(),
        )
    }

    pub fn data_root(&self) -> DataRoot {
        self.dah().hash()
    }
}

fn square_width(share_count: usize) -> SquareResult<usize> {
    let width = (share_count as f64).sqrt() as usize;
    if width == 0 || width * width != share_count || !width.is_power_of_two() {
        return Err(SquareError::InvalidWidth(width));
    }
    Ok(width)
}

fn check_share_sizes(shares: &[Vec<u8>]) -> SquareResult<usize> {
    let expected = shares.first().map(Vec::len).unwrap_or(0);
    for (index, share) in shares.iter().enumerate() {
        if share.len() != expected || share.is_empty() {
            return Err(SquareError::ShareSize {
                index,
                expected,
                actual: share.len(),
            });
        }
    }
    Ok(expected)
}
