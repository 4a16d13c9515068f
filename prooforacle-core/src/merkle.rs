// Copyright (c) 2025 Prooforacle Authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stamp Tree Structure
//!
//! Binary Merkle tree over an ordered sequence of leaf stamps. The root
//! certifies a whole batch; a per-leaf proof lets a verifier replay the path
//! from one stamp to the root.
//!
//! # Construction
//!
//! Two independent implementations must agree bit-for-bit, so the rules are
//! fixed:
//! - 0 leaves: root = SHA256("") (empty sentinel), no proofs
//! - 1 leaf: root = SHA256(stamp), proof path is empty
//! - Otherwise layer 0 holds the stamps as-is (no pre-hashing) and each
//!   parent is SHA256(left || right)
//! - Pairs are (2i, 2i+1) by index, never sorted by hash value
//! - An odd trailing node is paired with itself (duplicate-last)

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::hash::{sha256, sha256_pair, Hash};

/// Errors that can occur when working with stamp trees
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Cannot prove a leaf of an empty tree")]
    EmptyTree,

    #[error("Index {index} out of bounds (tree has {leaves} leaves)")]
    IndexOutOfBounds { index: usize, leaves: usize },

    #[error("Stamp {0} is not a leaf of this tree")]
    UnknownStamp(Hash),
}

pub type Result<T> = std::result::Result<T, TreeError>;

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One level of a proof path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Hash,
    pub side: Side,
}

/// A Merkle inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// The index of the leaf being proved
    pub leaf_index: usize,
    /// The number of leaves in the tree
    pub leaf_count: usize,
    /// Sibling hashes from the leaf level up to just below the root
    pub path: Vec<ProofStep>,
}

/// Root of a tree with no leaves
pub fn empty_root() -> Hash {
    sha256(b"")
}

/// Number of levels above the leaves for a tree of `leaf_count` leaves
///
/// Matches the proof path length: 0 for zero or one leaf, otherwise
/// ceil(log2(leaf_count)).
pub fn tree_height(leaf_count: usize) -> usize {
    if leaf_count <= 1 {
        return 0;
    }
    (usize::BITS - (leaf_count - 1).leading_zeros()) as usize
}

/// Merkle tree over leaf stamps
#[derive(Debug, Clone)]
pub struct StampTree {
    /// layers[0] = stamps, layers[last] = root (for two or more leaves)
    layers: Vec<Vec<Hash>>,
    root: Hash,
}

impl StampTree {
    /// Build a tree from stamps in leaf order
    pub fn build(stamps: Vec<Hash>) -> Self {
        match stamps.len() {
            0 => {
                return Self {
                    layers: vec![stamps],
                    root: empty_root(),
                }
            }
            1 => {
                let root = sha256(stamps[0].as_bytes());
                return Self {
                    layers: vec![stamps],
                    root,
                };
            }
            _ => {}
        }

        let layers = Self::build_layers(stamps);
        let root = layers
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_else(empty_root);

        Self { layers, root }
    }

    fn build_layers(stamps: Vec<Hash>) -> Vec<Vec<Hash>> {
        let mut layers = vec![stamps];

        while let Some(current) = layers.last() {
            if current.len() <= 1 {
                break;
            }
            let next = Self::build_next_layer(current);
            trace!(width = next.len(), "Built tree layer");
            layers.push(next);
        }

        layers
    }

    fn build_next_layer(current: &[Hash]) -> Vec<Hash> {
        current
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => sha256_pair(left, right),
                [last] => sha256_pair(last, last),
                _ => unreachable!("chunks(2) yields one or two nodes"),
            })
            .collect()
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn leaf_count(&self) -> usize {
        self.layers.first().map(|layer| layer.len()).unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        tree_height(self.leaf_count())
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    /// The stamps in leaf order
    pub fn leaves(&self) -> &[Hash] {
        self.layers.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Get the inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> Result<MerkleProof> {
        let leaf_count = self.leaf_count();
        if leaf_count == 0 {
            return Err(TreeError::EmptyTree);
        }
        if index >= leaf_count {
            return Err(TreeError::IndexOutOfBounds {
                index,
                leaves: leaf_count,
            });
        }

        let depth = self.layers.len() - 1;
        let mut path = Vec::with_capacity(depth);
        let mut k = index;

        for layer in &self.layers[..depth] {
            let step = if k % 2 == 1 {
                ProofStep {
                    sibling: layer[k - 1],
                    side: Side::Left,
                }
            } else {
                // Duplicate-last: a node without a right neighbour is its own sibling
                let sibling = layer.get(k + 1).copied().unwrap_or(layer[k]);
                ProofStep {
                    sibling,
                    side: Side::Right,
                }
            };
            path.push(step);
            k >>= 1;
        }

        Ok(MerkleProof {
            leaf_index: index,
            leaf_count,
            path,
        })
    }

    /// Get the proof for the first leaf equal to `stamp`
    pub fn proof_for(&self, stamp: &Hash) -> Result<MerkleProof> {
        let index = self
            .leaves()
            .iter()
            .position(|leaf| leaf == stamp)
            .ok_or(TreeError::UnknownStamp(*stamp))?;
        self.proof(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamps(n: usize) -> Vec<Hash> {
        (0..n)
            .map(|i| sha256(format!("stamp {}", i).as_bytes()))
            .collect()
    }

    /// Replay a proof without any structural checks
    fn replay(stamp: Hash, proof: &MerkleProof) -> Hash {
        if proof.leaf_count == 1 {
            return sha256(stamp.as_bytes());
        }
        proof.path.iter().fold(stamp, |acc, step| match step.side {
            Side::Left => sha256_pair(&step.sibling, &acc),
            Side::Right => sha256_pair(&acc, &step.sibling),
        })
    }

    #[test]
    fn test_empty_tree() {
        let tree = StampTree::build(vec![]);
        assert!(tree.is_empty());
        assert_eq!(tree.root(), empty_root());
        assert_eq!(tree.height(), 0);
        assert!(matches!(tree.proof(0), Err(TreeError::EmptyTree)));
    }

    #[test]
    fn test_single_leaf() {
        let leaves = stamps(1);
        let tree = StampTree::build(leaves.clone());

        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.root(), sha256(leaves[0].as_bytes()));

        let proof = tree.proof(0).unwrap();
        assert!(proof.path.is_empty());
        assert_eq!(proof.leaf_count, 1);
    }

    #[test]
    fn test_two_leaves_root_is_plain_concatenation() {
        let leaves = stamps(2);
        let tree = StampTree::build(leaves.clone());

        assert_eq!(tree.root(), sha256_pair(&leaves[0], &leaves[1]));

        let proof = tree.proof(0).unwrap();
        assert_eq!(
            proof.path,
            vec![ProofStep {
                sibling: leaves[1],
                side: Side::Right
            }]
        );

        let proof = tree.proof(1).unwrap();
        assert_eq!(
            proof.path,
            vec![ProofStep {
                sibling: leaves[0],
                side: Side::Left
            }]
        );
    }

    #[test]
    fn test_three_leaves_duplicate_last() {
        let l = stamps(3);
        let tree = StampTree::build(l.clone());

        let left = sha256_pair(&l[0], &l[1]);
        let right = sha256_pair(&l[2], &l[2]);
        assert_eq!(tree.root(), sha256_pair(&left, &right));

        let proof = tree.proof(2).unwrap();
        assert_eq!(
            proof.path,
            vec![
                ProofStep {
                    sibling: l[2],
                    side: Side::Right
                },
                ProofStep {
                    sibling: left,
                    side: Side::Left
                },
            ]
        );
    }

    #[test]
    fn test_every_proof_replays_to_root() {
        for n in 1..=33 {
            let leaves = stamps(n);
            let tree = StampTree::build(leaves.clone());
            assert_eq!(tree.height(), tree_height(n));

            for (i, stamp) in leaves.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert_eq!(proof.path.len(), tree_height(n), "n={} i={}", n, i);
                assert_eq!(replay(*stamp, &proof), tree.root(), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_tree_height() {
        assert_eq!(tree_height(0), 0);
        assert_eq!(tree_height(1), 0);
        assert_eq!(tree_height(2), 1);
        assert_eq!(tree_height(3), 2);
        assert_eq!(tree_height(4), 2);
        assert_eq!(tree_height(5), 3);
        assert_eq!(tree_height(100), 7);
        assert_eq!(tree_height(1024), 10);
        assert_eq!(tree_height(1025), 11);
    }

    #[test]
    fn test_root_is_reproducible_and_order_sensitive() {
        let leaves = stamps(7);
        let a = StampTree::build(leaves.clone()).root();
        let b = StampTree::build(leaves.clone()).root();
        assert_eq!(a, b);

        let mut shuffled = leaves.clone();
        shuffled.swap(0, 5);
        assert_ne!(StampTree::build(shuffled).root(), a);

        let mut reversed = leaves;
        reversed.reverse();
        assert_ne!(StampTree::build(reversed).root(), a);
    }

    #[test]
    fn test_proof_out_of_bounds() {
        let tree = StampTree::build(stamps(3));
        let result = tree.proof(3);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("out of bounds"));
    }

    #[test]
    fn test_proof_for_stamp() {
        let leaves = stamps(5);
        let tree = StampTree::build(leaves.clone());

        let proof = tree.proof_for(&leaves[3]).unwrap();
        assert_eq!(proof.leaf_index, 3);
        assert_eq!(proof, tree.proof(3).unwrap());

        let missing = sha256(b"not a leaf");
        assert!(matches!(
            tree.proof_for(&missing),
            Err(TreeError::UnknownStamp(h)) if h == missing
        ));
    }

    #[test]
    fn test_proof_serde_shape() {
        let tree = StampTree::build(stamps(2));
        let proof = tree.proof(0).unwrap();
        let json = serde_json::to_value(&proof).unwrap();

        assert_eq!(json["leaf_index"], 0);
        assert_eq!(json["leaf_count"], 2);
        assert_eq!(json["path"][0]["side"], "right");
        assert_eq!(json["path"][0]["sibling"], tree.leaves()[1].to_hex());

        let back: MerkleProof = serde_json::from_value(json).unwrap();
        assert_eq!(back, proof);
    }
}
