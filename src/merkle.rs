// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Merkle Tree over Witness Entries
//!
//! Leaves are the chained entry hashes of a witness log, in sequence order.
//! Leaf and interior nodes are hashed under different domain tags, and an
//! unpaired node at the end of a level is carried up unchanged rather than
//! duplicated, so no two distinct leaf sequences share a root.
//!
//! Hashing is parallel above [`PARALLEL_HASH_THRESHOLD`] nodes per level.
//! The worker count never changes the result.

use crate::config::{DOMAIN_MERKLE_EMPTY, DOMAIN_MERKLE_LEAF, DOMAIN_MERKLE_NODE, PARALLEL_HASH_THRESHOLD};
use crate::error::MerkleError;
use crate::hash::{domain_hash, serde_hex, CanonicalHasher, Hash};
use serde::{Deserialize, Serialize};

pub fn leaf_hash(entry_hash: &Hash) -> Hash {
    domain_hash(DOMAIN_MERKLE_LEAF, entry_hash)
}

pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut h = CanonicalHasher::new(DOMAIN_MERKLE_NODE);
    h.update_hash(left).update_hash(right);
    h.finalize()
}

/// Root of a log with no entries.
pub fn empty_root() -> Hash {
    domain_hash(DOMAIN_MERKLE_EMPTY, &[])
}

/// Fully materialised tree. `levels[0]` holds the leaf hashes.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn build(entry_hashes: &[Hash], workers: usize) -> Self {
        let leaves = parallel_fill(entry_hashes.len(), workers, |i| leaf_hash(&entry_hashes[i]));
        let mut levels = vec![leaves];

        while levels.last().map_or(false, |l| l.len() > 1) {
            let prev = &levels[levels.len() - 1];
            let next = parallel_fill(prev.len().div_ceil(2), workers, |i| {
                let l = 2 * i;
                if l + 1 < prev.len() {
                    node_hash(&prev[l], &prev[l + 1])
                } else {
                    prev[l]
                }
            });
            levels.push(next);
        }

        Self { levels }
    }

    pub fn root(&self) -> Hash {
        match self.levels.last().and_then(|l| l.first()) {
            Some(root) => *root,
            None => empty_root(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize, entry_hash: Hash) -> Result<MerkleProof, MerkleError> {
        let len = self.leaf_count();
        if len == 0 {
            return Err(MerkleError::EmptyTree);
        }
        if index >= len {
            return Err(MerkleError::IndexOutOfBounds { index, len });
        }

        let mut siblings = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            if idx % 2 == 1 {
                siblings.push(ProofStep { hash: level[idx - 1], side: Side::Left });
            } else if idx + 1 < level.len() {
                siblings.push(ProofStep { hash: level[idx + 1], side: Side::Right });
            }
            idx /= 2;
        }

        Ok(MerkleProof {
            leaf_index: index as u64,
            leaf_count: len as u64,
            entry_hash,
            siblings,
        })
    }
}

/// Root over a slice of entry hashes.
pub fn merkle_root(entry_hashes: &[Hash], workers: usize) -> Hash {
    MerkleTree::build(entry_hashes, workers).root()
}

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    #[serde(with = "serde_hex")]
    pub hash: Hash,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: u64,
    pub leaf_count: u64,
    #[serde(with = "serde_hex")]
    pub entry_hash: Hash,
    pub siblings: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recompute the root from the entry hash and the sibling path.
    ///
    /// The path must have exactly the shape implied by `leaf_index` and
    /// `leaf_count`; a proof whose sides or length disagree is rejected
    /// even if it happens to hash to `root`.
    pub fn verify(&self, root: &Hash) -> bool {
        if self.leaf_count == 0 || self.leaf_index >= self.leaf_count {
            return false;
        }

        let mut acc = leaf_hash(&self.entry_hash);
        let mut idx = self.leaf_index;
        let mut count = self.leaf_count;
        let mut steps = self.siblings.iter();

        while count > 1 {
            if idx % 2 == 1 {
                match steps.next() {
                    Some(ProofStep { hash, side: Side::Left }) => acc = node_hash(hash, &acc),
                    _ => return false,
                }
            } else if idx + 1 < count {
                match steps.next() {
                    Some(ProofStep { hash, side: Side::Right }) => acc = node_hash(&acc, hash),
                    _ => return false,
                }
            }
            idx /= 2;
            count = count.div_ceil(2);
        }

        steps.next().is_none() && &acc == root
    }
}

/// Fill `len` slots with `f(i)`, splitting the range across scoped threads
/// when the level is wide enough.
fn parallel_fill<F>(len: usize, workers: usize, f: F) -> Vec<Hash>
where
    F: Fn(usize) -> Hash + Sync,
{
    let mut out = vec![[0u8; 32]; len];
    if workers <= 1 || len < PARALLEL_HASH_THRESHOLD {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = f(i);
        }
        return out;
    }

    let chunk = len.div_ceil(workers);
    std::thread::scope(|s| {
        for (c, slots) in out.chunks_mut(chunk).enumerate() {
            let f = &f;
            s.spawn(move || {
                for (j, slot) in slots.iter_mut().enumerate() {
                    *slot = f(c * chunk + j);
                }
            });
        }
    });
    out
}
