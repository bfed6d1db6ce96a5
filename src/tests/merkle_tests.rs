// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::error::MerkleError;
use crate::hash::{hash_bytes, Hash};
use crate::merkle::{empty_root, leaf_hash, merkle_root, node_hash, MerkleTree, Side};

fn hashes(n: usize) -> Vec<Hash> {
    (0..n as u64).map(|i| hash_bytes(&i.to_le_bytes())).collect()
}

#[test]
fn test_empty_and_single_leaf_roots() {
    assert_eq!(merkle_root(&[], 1), empty_root());

    let h = hashes(1);
    assert_eq!(merkle_root(&h, 1), leaf_hash(&h[0]));
}

#[test]
fn test_odd_node_is_carried_not_duplicated() {
    let h = hashes(3);
    let l: Vec<Hash> = h.iter().map(leaf_hash).collect();
    let expected = node_hash(&node_hash(&l[0], &l[1]), &l[2]);
    assert_eq!(merkle_root(&h, 1), expected);

    // Duplicating the last leaf must not produce the same root
    let mut dup = h.clone();
    dup.push(h[2]);
    assert_ne!(merkle_root(&dup, 1), expected);
}

#[test]
fn test_worker_count_does_not_change_root() {
    let h = hashes(1_000);
    let single = merkle_root(&h, 1);
    for workers in [2, 3, 4, 8, 16] {
        assert_eq!(merkle_root(&h, workers), single, "workers={workers}");
    }
}

#[test]
fn test_every_proof_verifies() {
    for n in [1usize, 2, 3, 5, 8, 13, 300] {
        let h = hashes(n);
        let tree = MerkleTree::build(&h, 4);
        let root = tree.root();
        for (i, entry_hash) in h.iter().enumerate() {
            let proof = tree.proof(i, *entry_hash).unwrap();
            assert!(proof.verify(&root), "n={n} i={i}");
        }
    }
}

#[test]
fn test_forged_proofs_rejected() {
    let h = hashes(7);
    let tree = MerkleTree::build(&h, 1);
    let root = tree.root();
    let proof = tree.proof(4, h[4]).unwrap();

    let mut wrong_leaf = proof.clone();
    wrong_leaf.entry_hash = h[5];
    assert!(!wrong_leaf.verify(&root));

    let mut bad_sibling = proof.clone();
    bad_sibling.siblings[0].hash[0] ^= 1;
    assert!(!bad_sibling.verify(&root));

    let mut flipped = proof.clone();
    flipped.siblings[0].side = match flipped.siblings[0].side {
        Side::Left => Side::Right,
        Side::Right => Side::Left,
    };
    assert!(!flipped.verify(&root));

    let mut extra = proof.clone();
    extra.siblings.push(extra.siblings[0].clone());
    assert!(!extra.verify(&root));

    let mut moved = proof.clone();
    moved.leaf_index = 5;
    assert!(!moved.verify(&root));

    assert!(!proof.verify(&[0u8; 32]));
}

#[test]
fn test_proof_bounds() {
    let tree = MerkleTree::build(&[], 1);
    assert_eq!(tree.proof(0, [0u8; 32]), Err(MerkleError::EmptyTree));

    let tree = MerkleTree::build(&hashes(2), 1);
    assert_eq!(
        tree.proof(2, [0u8; 32]),
        Err(MerkleError::IndexOutOfBounds { index: 2, len: 2 })
    );
}
