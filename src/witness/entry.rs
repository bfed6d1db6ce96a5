// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Witness entries and the entry hash chain.
//!
//! ```text
//! payload_hash(n) = H_payload(payload bytes)
//! entry_hash(n)   = H_entry(seq ‖ kind ‖ label ‖ payload_hash(n) ‖ entry_hash(n-1))
//! entry_hash(-1)  = 0^32
//! ```

use crate::config::{DOMAIN_ENTRY, DOMAIN_PAYLOAD};
use crate::hash::{domain_hash, CanonicalHasher, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    FileRead,
    FileWrite,
    NetworkIn,
    NetworkOut,
    SyscallResult,
    EnvironmentRead,
    RandomnessInjection,
    PolicyViolation,
}

impl OperationKind {
    /// Stable tag absorbed into the entry hash. Never renumber.
    pub fn tag(self) -> u8 {
        match self {
            OperationKind::FileRead => 1,
            OperationKind::FileWrite => 2,
            OperationKind::NetworkIn => 3,
            OperationKind::NetworkOut => 4,
            OperationKind::SyscallResult => 5,
            OperationKind::EnvironmentRead => 6,
            OperationKind::RandomnessInjection => 7,
            OperationKind::PolicyViolation => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::FileRead => "file_read",
            OperationKind::FileWrite => "file_write",
            OperationKind::NetworkIn => "network_in",
            OperationKind::NetworkOut => "network_out",
            OperationKind::SyscallResult => "syscall_result",
            OperationKind::EnvironmentRead => "environment_read",
            OperationKind::RandomnessInjection => "randomness_injection",
            OperationKind::PolicyViolation => "policy_violation",
        }
    }

    /// Inputs whose raw bytes a replay must feed back to the workload.
    pub fn is_replayable_input(self) -> bool {
        matches!(
            self,
            OperationKind::FileRead | OperationKind::NetworkIn | OperationKind::EnvironmentRead
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn payload_hash(payload: &[u8]) -> Hash {
    domain_hash(DOMAIN_PAYLOAD, payload)
}

pub fn compute_entry_hash(
    sequence_number: u64,
    kind: OperationKind,
    label: &str,
    operation_payload_hash: &Hash,
    previous: &Hash,
) -> Hash {
    let mut h = CanonicalHasher::new(DOMAIN_ENTRY);
    h.update_u64(sequence_number)
        .update_u8(kind.tag())
        .update_bytes(label.as_bytes())
        .update_hash(operation_payload_hash)
        .update_hash(previous);
    h.finalize()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessEntry {
    pub sequence_number: u64,
    pub operation_kind: OperationKind,
    pub label: String,
    pub operation_payload_hash: Hash,
    pub entry_hash: Hash,
    /// Raw payload, kept only for replayable inputs. Not part of the chain;
    /// checked against `operation_payload_hash` instead.
    pub payload: Option<Vec<u8>>,
}

impl WitnessEntry {
    pub fn new(
        sequence_number: u64,
        operation_kind: OperationKind,
        label: impl Into<String>,
        payload: &[u8],
        retain: bool,
        previous: &Hash,
    ) -> Self {
        let label = label.into();
        let operation_payload_hash = payload_hash(payload);
        let entry_hash = compute_entry_hash(
            sequence_number,
            operation_kind,
            &label,
            &operation_payload_hash,
            previous,
        );
        Self {
            sequence_number,
            operation_kind,
            label,
            operation_payload_hash,
            entry_hash,
            payload: retain.then(|| payload.to_vec()),
        }
    }

    /// Entry hash recomputed from the stored fields. A retained payload is
    /// rehashed and takes the place of the stored payload hash.
    pub fn recompute_hash(&self, previous: &Hash) -> Hash {
        let operation_payload_hash = match &self.payload {
            Some(bytes) => payload_hash(bytes),
            None => self.operation_payload_hash,
        };
        compute_entry_hash(
            self.sequence_number,
            self.operation_kind,
            &self.label,
            &operation_payload_hash,
            previous,
        )
    }

    /// False only when a retained payload disagrees with its hash.
    pub fn payload_matches(&self) -> bool {
        match &self.payload {
            Some(bytes) => payload_hash(bytes) == self.operation_payload_hash,
            None => true,
        }
    }
}
