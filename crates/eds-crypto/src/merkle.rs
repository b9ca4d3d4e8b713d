use eds_types::ContentId;

use crate::hasher::ContentHasher;

/// An inner node of a Merkle tree as it is stored in a shard: its
/// identifier plus the 64 bytes `left || right` it was hashed from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InnerNode {
    pub id: ContentId,
    pub data: [u8; 64],
}

/// Binary Merkle tree over share leaf identifiers.
///
/// Rows and columns of an extended square have a power-of-two width, so in
/// practice every tree is perfect. Odd levels are still handled by pairing
/// the last node with itself.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: ContentId,
    /// Level 0 = leaves, last level = root.
    levels: Vec<Vec<ContentId>>,
}

impl MerkleTree {
    /// Build a Merkle tree from leaf identifiers.
    ///
    /// An empty list produces an all-zero root. A single leaf is its own root.
    pub fn from_leaves(leaves: Vec<ContentId>) -> Self {
        if leaves.is_empty() {
            return Self {
                root: ContentId::from_hash([0u8; 32]),
                levels: vec![],
            };
        }

        let mut levels: Vec<Vec<ContentId>> = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let next: Vec<ContentId> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        let root = levels[levels.len() - 1][0];
        Self { root, levels }
    }

    /// The root hash of the tree.
    pub fn root(&self) -> ContentId {
        self.root
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Every inner node, bottom level first, left to right.
    pub fn inner_nodes(&self) -> Vec<InnerNode> {
        let mut nodes = Vec::new();
        for (depth, level) in self.levels.iter().enumerate().skip(1) {
            let below = &self.levels[depth - 1];
            for (i, id) in level.iter().enumerate() {
                let left = below[2 * i];
                let right = below.get(2 * i + 1).copied().unwrap_or(left);
                let mut data = [0u8; 64];
                data[..32].copy_from_slice(left.as_bytes());
                data[32..].copy_from_slice(right.as_bytes());
                nodes.push(InnerNode { id: *id, data });
            }
        }
        nodes
    }
}

/// Identifier of the inner node over `left || right`.
pub fn hash_pair(left: &ContentId, right: &ContentId) -> ContentId {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    ContentHasher::NODE.hash(&data)
}
