// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The witness log: ordered entries plus the Merkle root once sealed.

use super::entry::WitnessEntry;
use crate::config::GENESIS_HASH;
use crate::error::{IntegrityError, KernelResult};
use crate::hash::Hash;
use crate::merkle::{MerkleProof, MerkleTree};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WitnessLog {
    entries: Vec<WitnessEntry>,
    merkle_root: Option<Hash>,
    truncated: bool,
}

impl WitnessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble a log read back from storage. Nothing is checked here;
    /// run `verify::verify_integrity` before trusting it.
    pub fn from_parts(entries: Vec<WitnessEntry>, merkle_root: Option<Hash>, truncated: bool) -> Self {
        Self {
            entries,
            merkle_root,
            truncated,
        }
    }

    pub fn entries(&self) -> &[WitnessEntry] {
        &self.entries
    }

    pub fn entry(&self, sequence_number: u64) -> Option<&WitnessEntry> {
        self.entries.get(sequence_number as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merkle_root(&self) -> Option<Hash> {
        self.merkle_root
    }

    pub fn is_sealed(&self) -> bool {
        self.merkle_root.is_some()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn last_entry_hash(&self) -> Hash {
        self.entries.last().map_or(GENESIS_HASH, |e| e.entry_hash)
    }

    /// Stored entry hashes in sequence order.
    pub fn entry_hashes(&self) -> Vec<Hash> {
        self.entries.iter().map(|e| e.entry_hash).collect()
    }

    pub fn merkle_tree(&self, workers: usize) -> MerkleTree {
        MerkleTree::build(&self.entry_hashes(), workers)
    }

    /// Inclusion proof for entry `sequence_number`. Only sealed logs can
    /// produce proofs.
    pub fn generate_proof(&self, sequence_number: u64, workers: usize) -> KernelResult<MerkleProof> {
        if !self.is_sealed() {
            return Err(IntegrityError::NotSealed {
                truncated: self.truncated,
            }
            .into());
        }
        let index = sequence_number as usize;
        let entry_hash = self.entries.get(index).map_or(GENESIS_HASH, |e| e.entry_hash);
        Ok(self.merkle_tree(workers).proof(index, entry_hash)?)
    }

    pub(crate) fn push(&mut self, entry: WitnessEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn seal(&mut self, root: Hash) {
        self.merkle_root = Some(root);
    }

    pub(crate) fn mark_truncated(&mut self) {
        self.truncated = true;
    }
}
