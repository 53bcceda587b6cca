// ledger-crypto/src/merkle.rs

use crate::{hash::Hashable, Hash};
use serde::{Deserialize, Serialize};

/// Keccak-256 of the empty byte string, the root of a window with no leaves
pub fn empty_root() -> Hash {
    let empty: &[u8] = &[];
    empty.hash()
}

/// Binary Merkle tree over byte-string leaves, padded to the next power of
/// two with zero hashes. Used as the commitment over a window's leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    /// All nodes in the tree (stored as a flat array, root at 0)
    nodes: Vec<Hash>,
    /// Number of leaf nodes
    leaf_count: usize,
}

impl MerkleTree {
    /// Build a Merkle tree from leaf data
    pub fn new<T: AsRef<[u8]>>(leaves: &[T]) -> Self {
        let leaf_count = leaves.len();
        if leaf_count == 0 {
            return Self {
                nodes: vec![empty_root()],
                leaf_count,
            };
        }

        let total_nodes = Self::total_nodes(leaf_count);
        let mut nodes = vec![Hash::zero(); total_nodes];

        let leaf_start = total_nodes - leaf_count.next_power_of_two();
        for (i, leaf) in leaves.iter().enumerate() {
            nodes[leaf_start + i] = leaf.as_ref().hash();
        }

        Self::build_tree(&mut nodes, leaf_start);

        Self { nodes, leaf_count }
    }

    /// Root of the tree over `leaves` without keeping the tree around
    pub fn root_of<T: AsRef<[u8]>>(leaves: &[T]) -> Hash {
        Self::new(leaves).root()
    }

    pub fn root(&self) -> Hash {
        self.nodes[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    fn total_nodes(leaf_count: usize) -> usize {
        2 * leaf_count.next_power_of_two() - 1
    }

    fn parent_index(index: usize) -> usize {
        (index - 1) / 2
    }

    fn build_tree(nodes: &mut [Hash], leaf_start: usize) {
        let mut level_start = leaf_start;

        while level_start > 0 {
            let parent_start = Self::parent_index(level_start);
            let level_size = level_start - parent_start;

            for i in 0..level_size {
                let left_index = level_start + i * 2;
                let right_index = left_index + 1;
                nodes[parent_start + i] = Self::combine_hashes(nodes[left_index], nodes[right_index]);
            }

            level_start = parent_start;
        }
    }

    fn combine_hashes(left: Hash, right: Hash) -> Hash {
        let mut combined = Vec::with_capacity(64);
        combined.extend_from_slice(left.as_bytes());
        combined.extend_from_slice(right.as_bytes());
        combined.hash()
    }
}
