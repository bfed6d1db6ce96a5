// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Witness Integrity Verification
//!
//! Recomputes every entry hash from the entry fields, rebuilds the Merkle
//! root over the recomputed chain and compares it with the root stored in
//! the log. Retained payloads are rehashed on the way, so a flipped payload
//! byte surfaces as a root mismatch at that entry. Checks run in a fixed
//! order so the first reported fault is the most fundamental one:
//!
//! 1. the log is sealed
//! 2. the root and every stored entry hash agree with the recomputed chain
//! 3. sequence numbers run 0, 1, 2, ...

use crate::config::GENESIS_HASH;
use crate::error::{EntryFault, IntegrityError};
use crate::hash::Hash;
use crate::merkle::merkle_root;
use crate::witness::{compute_entry_hash, WitnessLog};

/// Verify a sealed log and return its root.
pub fn verify_integrity(log: &WitnessLog, workers: usize) -> Result<Hash, IntegrityError> {
    let claimed = match log.merkle_root() {
        Some(root) if !log.is_truncated() => root,
        _ => {
            return Err(IntegrityError::NotSealed {
                truncated: log.is_truncated(),
            })
        }
    };

    let mut chain = Vec::with_capacity(log.len());
    let mut previous = GENESIS_HASH;
    let mut first_fault = None;

    for entry in log.entries() {
        let expected = entry.recompute_hash(&previous);
        if first_fault.is_none() {
            let actual = if expected != entry.entry_hash {
                Some(entry.entry_hash)
            } else if !entry.payload_matches() {
                // Payload intact, stored payload hash rewritten.
                Some(compute_entry_hash(
                    entry.sequence_number,
                    entry.operation_kind,
                    &entry.label,
                    &entry.operation_payload_hash,
                    &previous,
                ))
            } else {
                None
            };
            first_fault = actual.map(|actual| EntryFault {
                sequence_number: entry.sequence_number,
                kind: entry.operation_kind,
                expected,
                actual,
            });
        }
        chain.push(expected);
        previous = expected;
    }

    let computed = merkle_root(&chain, workers);
    if computed != claimed || first_fault.is_some() {
        return Err(IntegrityError::RootMismatch {
            claimed,
            computed,
            first_fault,
        });
    }

    for (index, entry) in log.entries().iter().enumerate() {
        if entry.sequence_number != index as u64 {
            return Err(IntegrityError::SequenceGap {
                index,
                found: entry.sequence_number,
            });
        }
    }

    Ok(computed)
}

/// Verify a log and additionally require its root to equal `expected`.
pub fn verify_against(log: &WitnessLog, expected: &Hash, workers: usize) -> Result<Hash, IntegrityError> {
    let root = verify_integrity(log, workers)?;
    if &root != expected {
        return Err(IntegrityError::RootMismatch {
            claimed: *expected,
            computed: root,
            first_fault: None,
        });
    }
    Ok(root)
}
