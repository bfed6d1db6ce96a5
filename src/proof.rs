// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Exported inclusion proofs.

use crate::config::GENESIS_HASH;
use crate::error::{KernelError, KernelResult, ProofError};
use crate::hash::{serde_hex, Hash};
use crate::merkle::MerkleProof;
use crate::witness::{compute_entry_hash, OperationKind, WitnessLog};
use serde::{Deserialize, Serialize};

pub const PROOF_VERSION: u32 = 1;

/// A self-contained receipt that one witness entry belongs to a sealed log.
///
/// It carries the entry fields and the previous entry hash, so an auditor
/// can recompute the entry hash instead of trusting it, then walk the
/// Merkle path up to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofDocument {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cage_id: Option<String>,
    pub sequence_number: u64,
    pub operation_kind: OperationKind,
    pub label: String,
    #[serde(with = "serde_hex")]
    pub operation_payload_hash: Hash,
    #[serde(with = "serde_hex")]
    pub previous_entry_hash: Hash,
    #[serde(with = "serde_hex")]
    pub entry_hash: Hash,
    #[serde(with = "serde_hex")]
    pub merkle_root: Hash,
    pub proof: MerkleProof,
}

impl ProofDocument {
    pub fn from_log(log: &WitnessLog, sequence_number: u64, workers: usize) -> KernelResult<Self> {
        let proof = log.generate_proof(sequence_number, workers)?;
        let entry = log
            .entry(sequence_number)
            .ok_or(KernelError::MissingEntry("requested"))?;
        let previous_entry_hash = match sequence_number {
            0 => GENESIS_HASH,
            n => log.entry(n - 1).map_or(GENESIS_HASH, |e| e.entry_hash),
        };
        let merkle_root = log.merkle_root().ok_or(KernelError::MissingEntry("root"))?;

        Ok(Self {
            version: PROOF_VERSION,
            cage_id: None,
            sequence_number,
            operation_kind: entry.operation_kind,
            label: entry.label.clone(),
            operation_payload_hash: entry.operation_payload_hash,
            previous_entry_hash,
            entry_hash: entry.entry_hash,
            merkle_root,
            proof,
        })
    }

    pub fn with_cage_id(mut self, cage_id: impl Into<String>) -> Self {
        self.cage_id = Some(cage_id.into());
        self
    }

    pub fn verify(&self) -> Result<(), ProofError> {
        if self.version != PROOF_VERSION {
            return Err(ProofError::UnsupportedVersion(self.version));
        }

        let recomputed = compute_entry_hash(
            self.sequence_number,
            self.operation_kind,
            &self.label,
            &self.operation_payload_hash,
            &self.previous_entry_hash,
        );
        if recomputed != self.entry_hash {
            return Err(ProofError::EntryHashMismatch {
                sequence_number: self.sequence_number,
            });
        }
        if self.proof.entry_hash != self.entry_hash || self.proof.leaf_index != self.sequence_number {
            return Err(ProofError::LeafMismatch);
        }
        if !self.proof.verify(&self.merkle_root) {
            return Err(ProofError::PathInvalid {
                root: self.merkle_root,
            });
        }
        Ok(())
    }
}
