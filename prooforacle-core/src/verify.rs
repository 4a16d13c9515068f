//! Inclusion proof verification
//!
//! Verification is a boolean predicate: a malformed proof is a `false`, not
//! an error. Structural problems are classified as [`InvalidProof`] and
//! logged at debug level so operators can tell a bad proof from a proof for
//! a different leaf.

use thiserror::Error;
use tracing::debug;

use crate::hash::{sha256, sha256_pair, Hash};
use crate::merkle::{tree_height, MerkleProof, Side};
use crate::oracle::TimestampedRoot;
use crate::stamp::{Leaf, StampFunction, StampRegistry};

/// Why a proof could not even be replayed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidProof {
    #[error("Proof claims an empty tree")]
    EmptyTree,

    #[error("Leaf index {index} out of bounds for {leaves} leaves")]
    IndexOutOfBounds { index: usize, leaves: usize },

    #[error("Proof has {actual} steps, a {leaves}-leaf tree needs {expected}")]
    WrongLength {
        leaves: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Step {level} has sibling on the {side:?} side, index parity disagrees")]
    WrongSide { level: usize, side: Side },

    #[error("Step {level} duplicates the last node but the sibling differs")]
    BadDuplicate { level: usize },

    #[error("Unknown stamp function: {0}")]
    UnknownStampFunction(String),

    #[error("Leaf timestamp {leaf} does not match root timestamp {root}")]
    TimestampMismatch { leaf: u64, root: u64 },
}

/// Verify that `leaf` is included under `root`
///
/// `stamp_function` must be the function the root was built with.
pub fn verify(leaf: &Leaf, proof: &MerkleProof, root: &Hash, stamp_function: &StampFunction) -> bool {
    let stamp = stamp_function.stamp(leaf);
    match replay(&stamp, proof) {
        Ok(computed) => computed == *root,
        Err(e) => {
            debug!(cid = %leaf.identifier, error = %e, "Rejected malformed proof");
            false
        }
    }
}

/// Verify against a published timestamped root
///
/// Resolves the stamp function by the id recorded in the root and requires
/// the leaf to carry the root's timestamp.
pub fn verify_with_registry(
    leaf: &Leaf,
    proof: &MerkleProof,
    root: &TimestampedRoot,
    registry: &StampRegistry,
) -> bool {
    match check_root_binding(leaf, root, registry) {
        Ok(function) => verify(leaf, proof, &root.root, &function),
        Err(e) => {
            debug!(cid = %leaf.identifier, error = %e, "Rejected proof");
            false
        }
    }
}

fn check_root_binding(
    leaf: &Leaf,
    root: &TimestampedRoot,
    registry: &StampRegistry,
) -> Result<StampFunction, InvalidProof> {
    if leaf.timestamp != root.timestamp {
        return Err(InvalidProof::TimestampMismatch {
            leaf: leaf.timestamp,
            root: root.timestamp,
        });
    }
    registry
        .resolve(&root.stamp_function)
        .map_err(|_| InvalidProof::UnknownStampFunction(root.stamp_function.clone()))
}

/// Recompute the root implied by a stamp and its proof
///
/// Applies the same pairing and duplicate-last rules the tree was built
/// with, rejecting proofs whose shape does not match `leaf_count`.
pub fn replay(stamp: &Hash, proof: &MerkleProof) -> Result<Hash, InvalidProof> {
    let leaves = proof.leaf_count;
    if leaves == 0 {
        return Err(InvalidProof::EmptyTree);
    }
    if proof.leaf_index >= leaves {
        return Err(InvalidProof::IndexOutOfBounds {
            index: proof.leaf_index,
            leaves,
        });
    }

    let expected = tree_height(leaves);
    if proof.path.len() != expected {
        return Err(InvalidProof::WrongLength {
            leaves,
            expected,
            actual: proof.path.len(),
        });
    }

    if leaves == 1 {
        return Ok(sha256(stamp.as_bytes()));
    }

    let mut current = *stamp;
    let mut index = proof.leaf_index;
    let mut width = leaves;

    for (level, step) in proof.path.iter().enumerate() {
        let is_right_child = index % 2 == 1;
        current = match (step.side, is_right_child) {
            (Side::Left, true) => sha256_pair(&step.sibling, &current),
            (Side::Right, false) => {
                if index == width - 1 && step.sibling != current {
                    return Err(InvalidProof::BadDuplicate { level });
                }
                sha256_pair(&current, &step.sibling)
            }
            (side, _) => return Err(InvalidProof::WrongSide { level, side }),
        };

        index >>= 1;
        width = (width + 1) >> 1;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{block_cid, RAW_CODEC};
    use crate::merkle::{ProofStep, StampTree};
    use crate::stamp::{CustomStamp, DEFAULT_STAMP_FUNCTION};

    fn leaves(n: usize, timestamp: u64) -> Vec<Leaf> {
        (0..n)
            .map(|i| {
                let cid = block_cid(format!("file {}", i).as_bytes(), RAW_CODEC).unwrap();
                Leaf::new(cid, timestamp)
            })
            .collect()
    }

    fn build(leaves: &[Leaf], f: &StampFunction) -> StampTree {
        StampTree::build(leaves.iter().map(|l| f.stamp(l)).collect())
    }

    fn constant_stamp(_leaf: &Leaf) -> Hash {
        Hash::new([7u8; 32])
    }

    #[test]
    fn test_all_leaves_verify() {
        let f = StampFunction::default();
        for n in 1..=17 {
            let ls = leaves(n, 1000);
            let tree = build(&ls, &f);
            for (i, leaf) in ls.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(verify(leaf, &proof, &tree.root(), &f), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_changed_fields_fail() {
        let f = StampFunction::default();
        let mut ls = leaves(4, 1000);
        ls[2].salt = Some(vec![9, 9]);
        let tree = build(&ls, &f);
        let proof = tree.proof(2).unwrap();
        assert!(verify(&ls[2], &proof, &tree.root(), &f));

        let mut leaf = ls[2].clone();
        leaf.timestamp += 1;
        assert!(!verify(&leaf, &proof, &tree.root(), &f));

        let mut leaf = ls[2].clone();
        leaf.salt = Some(vec![9, 8]);
        assert!(!verify(&leaf, &proof, &tree.root(), &f));

        let mut leaf = ls[2].clone();
        leaf.salt = None;
        assert!(!verify(&leaf, &proof, &tree.root(), &f));

        let mut leaf = ls[2].clone();
        leaf.identifier = ls[0].identifier;
        assert!(!verify(&leaf, &proof, &tree.root(), &f));
    }

    #[test]
    fn test_wrong_stamp_function_fails() {
        let ls = leaves(3, 1000);
        let tree = build(&ls, &StampFunction::Sha256);
        let proof = tree.proof(1).unwrap();

        assert!(verify(&ls[1], &proof, &tree.root(), &StampFunction::Sha256));
        assert!(!verify(&ls[1], &proof, &tree.root(), &StampFunction::Blake3));
    }

    #[test]
    fn test_single_leaf_tree() {
        let f = StampFunction::default();
        let ls = leaves(1, 5);
        let tree = build(&ls, &f);
        let proof = tree.proof(0).unwrap();

        assert!(verify(&ls[0], &proof, &tree.root(), &f));
        assert_eq!(replay(&f.stamp(&ls[0]), &proof), Ok(tree.root()));
    }

    #[test]
    fn test_malformed_proofs_are_false() {
        let f = StampFunction::default();
        let ls = leaves(5, 1000);
        let tree = build(&ls, &f);
        let root = tree.root();
        let good = tree.proof(1).unwrap();
        let stamp = f.stamp(&ls[1]);

        let mut short = good.clone();
        short.path.pop();
        assert!(matches!(
            replay(&stamp, &short),
            Err(InvalidProof::WrongLength { expected: 3, actual: 2, .. })
        ));
        assert!(!verify(&ls[1], &short, &root, &f));

        let mut long = good.clone();
        long.path.push(long.path[0].clone());
        assert!(!verify(&ls[1], &long, &root, &f));

        let mut out_of_range = good.clone();
        out_of_range.leaf_index = 5;
        assert!(matches!(
            replay(&stamp, &out_of_range),
            Err(InvalidProof::IndexOutOfBounds { .. })
        ));

        let mut empty = good.clone();
        empty.leaf_count = 0;
        assert_eq!(replay(&stamp, &empty), Err(InvalidProof::EmptyTree));

        let mut flipped = good.clone();
        flipped.path[0].side = Side::Right;
        assert!(matches!(
            replay(&stamp, &flipped),
            Err(InvalidProof::WrongSide { level: 0, .. })
        ));
        assert!(!verify(&ls[1], &flipped, &root, &f));
    }

    #[test]
    fn test_bad_duplicate_rejected() {
        let f = StampFunction::default();
        let ls = leaves(3, 1000);
        let tree = build(&ls, &f);
        let mut proof = tree.proof(2).unwrap();
        assert!(verify(&ls[2], &proof, &tree.root(), &f));

        proof.path[0] = ProofStep {
            sibling: sha256(b"forged"),
            side: Side::Right,
        };
        assert_eq!(
            replay(&f.stamp(&ls[2]), &proof),
            Err(InvalidProof::BadDuplicate { level: 0 })
        );
    }

    #[test]
    fn test_proof_for_other_leaf_fails() {
        let f = StampFunction::default();
        let ls = leaves(4, 1000);
        let tree = build(&ls, &f);
        let proof = tree.proof(0).unwrap();

        assert!(!verify(&ls[1], &proof, &tree.root(), &f));
        assert!(!verify(&ls[0], &proof, &sha256(b"other root"), &f));
    }

    #[test]
    fn test_verify_with_registry() {
        let f = StampFunction::default();
        let ls = leaves(3, 1234);
        let tree = build(&ls, &f);
        let root = TimestampedRoot::new(tree.root(), 1234, DEFAULT_STAMP_FUNCTION);
        let registry = StampRegistry::new();
        let proof = tree.proof(2).unwrap();

        assert!(verify_with_registry(&ls[2], &proof, &root, &registry));

        let mut stale = ls[2].clone();
        stale.timestamp = 1233;
        assert!(!verify_with_registry(&stale, &proof, &root, &registry));

        let unknown = TimestampedRoot::new(tree.root(), 1234, "whirlpool");
        assert!(!verify_with_registry(&ls[2], &proof, &unknown, &registry));
    }

    #[test]
    fn test_verify_with_custom_registry() {
        let custom = CustomStamp::new("constant", constant_stamp).unwrap();
        let f = StampFunction::Custom(custom);
        let ls = leaves(2, 9);
        let tree = build(&ls, &f);
        let root = TimestampedRoot::new(tree.root(), 9, "constant");
        let proof = tree.proof(0).unwrap();

        assert!(verify_with_registry(
            &ls[0],
            &proof,
            &root,
            &StampRegistry::with_custom(custom)
        ));
        assert!(!verify_with_registry(&ls[0], &proof, &root, &StampRegistry::new()));
    }
}
