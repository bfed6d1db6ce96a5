// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replay Support
//!
//! The pure half of replay: indexing a verified log so its recorded inputs
//! can be fed back to the workload, and comparing a replayed execution with
//! the original.
//!
//! # Comparison order
//! The witness root is compared first. Outputs are only meaningful once the
//! two runs are known to have consumed the same inputs, so a root mismatch
//! is always reported ahead of exit code, stdout and stderr.

use crate::error::{KernelError, KernelResult};
use crate::hash::{serde_hex, serde_hex_opt, Hash};
use crate::types::ExecutionSummary;
use crate::witness::payload::{
    self, EntropyPayload, EnvironmentPayload, ExitPayload, FilterPayload, InvocationPayload, LABEL_ENTROPY,
    LABEL_EXECVE, LABEL_EXIT, LABEL_POLICY, LABEL_STDIN,
};
use crate::witness::{OperationKind, WitnessEntry, WitnessLog};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First position at which two logs disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDivergence {
    pub sequence_number: u64,
    pub original_kind: Option<OperationKind>,
    pub replayed_kind: Option<OperationKind>,
    #[serde(with = "serde_hex_opt")]
    pub original_hash: Option<Hash>,
    #[serde(with = "serde_hex_opt")]
    pub replayed_hash: Option<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum DivergenceReport {
    WitnessRoot {
        #[serde(with = "serde_hex_opt")]
        original: Option<Hash>,
        #[serde(with = "serde_hex_opt")]
        replayed: Option<Hash>,
        first_divergent_entry: Option<EntryDivergence>,
    },
    ExitCode {
        original: i32,
        replayed: i32,
    },
    Stdout {
        #[serde(with = "serde_hex")]
        original: Hash,
        #[serde(with = "serde_hex")]
        replayed: Hash,
    },
    Stderr {
        #[serde(with = "serde_hex")]
        original: Hash,
        #[serde(with = "serde_hex")]
        replayed: Hash,
    },
}

impl DivergenceReport {
    pub fn field(&self) -> &'static str {
        match self {
            DivergenceReport::WitnessRoot { .. } => "witness_root",
            DivergenceReport::ExitCode { .. } => "exit_code",
            DivergenceReport::Stdout { .. } => "stdout",
            DivergenceReport::Stderr { .. } => "stderr",
        }
    }
}

impl std::fmt::Display for DivergenceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergenceReport::WitnessRoot {
                first_divergent_entry: Some(d),
                ..
            } => write!(f, "witness root diverged at entry {}", d.sequence_number),
            DivergenceReport::WitnessRoot { .. } => write!(f, "witness root diverged"),
            DivergenceReport::ExitCode { original, replayed } => {
                write!(f, "exit code diverged: {original} != {replayed}")
            }
            DivergenceReport::Stdout { .. } => write!(f, "stdout diverged"),
            DivergenceReport::Stderr { .. } => write!(f, "stderr diverged"),
        }
    }
}

/// First entry whose chained hash differs, or where one log ends early.
pub fn compare_logs(original: &WitnessLog, replayed: &WitnessLog) -> Option<EntryDivergence> {
    let a = original.entries();
    let b = replayed.entries();
    let len = a.len().max(b.len());

    (0..len).find_map(|i| {
        let (x, y) = (a.get(i), b.get(i));
        let same = matches!((x, y), (Some(x), Some(y)) if x.entry_hash == y.entry_hash);
        (!same).then(|| EntryDivergence {
            sequence_number: i as u64,
            original_kind: x.map(|e| e.operation_kind),
            replayed_kind: y.map(|e| e.operation_kind),
            original_hash: x.map(|e| e.entry_hash),
            replayed_hash: y.map(|e| e.entry_hash),
        })
    })
}

/// Compare a replayed run with the original. `None` means identical.
pub fn compare(
    original: &ExecutionSummary,
    original_log: &WitnessLog,
    replayed: &ExecutionSummary,
    replayed_log: &WitnessLog,
) -> Option<DivergenceReport> {
    if original.witness_root != replayed.witness_root || original_log.merkle_root() != replayed_log.merkle_root() {
        return Some(DivergenceReport::WitnessRoot {
            original: original.witness_root,
            replayed: replayed.witness_root,
            first_divergent_entry: compare_logs(original_log, replayed_log),
        });
    }
    if original.exit_code != replayed.exit_code {
        return Some(DivergenceReport::ExitCode {
            original: original.exit_code,
            replayed: replayed.exit_code,
        });
    }
    if original.stdout_hash != replayed.stdout_hash {
        return Some(DivergenceReport::Stdout {
            original: original.stdout_hash,
            replayed: replayed.stdout_hash,
        });
    }
    if original.stderr_hash != replayed.stderr_hash {
        return Some(DivergenceReport::Stderr {
            original: original.stderr_hash,
            replayed: replayed.stderr_hash,
        });
    }
    None
}

/// Recorded entries indexed by sequence number.
///
/// Built from a log that already passed `verify_integrity`, so entry `n`
/// sits at index `n`.
#[derive(Debug, Clone)]
pub struct ReplayArena {
    entries: Vec<WitnessEntry>,
}

impl ReplayArena {
    pub fn new(log: &WitnessLog) -> Self {
        Self {
            entries: log.entries().to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sequence_number: u64) -> Option<&WitnessEntry> {
        self.entries.get(sequence_number as usize)
    }

    fn find(&self, kind: OperationKind, label: &str) -> impl Iterator<Item = &WitnessEntry> + '_ {
        let label = label.to_string();
        self.entries
            .iter()
            .filter(move |e| e.operation_kind == kind && e.label == label)
    }

    fn retained(entry: &WitnessEntry) -> KernelResult<&[u8]> {
        entry.payload.as_deref().ok_or_else(|| KernelError::MissingPayload {
            sequence_number: entry.sequence_number,
            label: entry.label.clone(),
        })
    }

    pub fn policy(&self) -> KernelResult<FilterPayload> {
        let entry = self
            .find(OperationKind::SyscallResult, LABEL_POLICY)
            .next()
            .ok_or(KernelError::MissingEntry(LABEL_POLICY))?;
        payload::decode(Self::retained(entry)?)
    }

    /// Environment exactly as the original workload saw it.
    pub fn environment(&self) -> KernelResult<BTreeMap<String, String>> {
        self.entries
            .iter()
            .filter(|e| e.operation_kind == OperationKind::EnvironmentRead)
            .map(|e| {
                let env: EnvironmentPayload = payload::decode(Self::retained(e)?)?;
                Ok((env.key, env.value))
            })
            .collect()
    }

    pub fn invocation(&self) -> KernelResult<InvocationPayload> {
        let entry = self
            .find(OperationKind::SyscallResult, LABEL_EXECVE)
            .next()
            .ok_or(KernelError::MissingEntry(LABEL_EXECVE))?;
        payload::decode(Self::retained(entry)?)
    }

    /// Recorded stdin, or empty when the workload was given none.
    pub fn stdin(&self) -> KernelResult<Vec<u8>> {
        match self.find(OperationKind::FileRead, LABEL_STDIN).next() {
            Some(entry) => Ok(Self::retained(entry)?.to_vec()),
            None => Ok(Vec::new()),
        }
    }

    /// Recorded draws in order, with the sequence number of each entry.
    pub fn entropy_draws(&self) -> KernelResult<Vec<(u64, EntropyPayload)>> {
        self.find(OperationKind::RandomnessInjection, LABEL_ENTROPY)
            .map(|e| Ok((e.sequence_number, payload::decode(Self::retained(e)?)?)))
            .collect()
    }

    pub fn exit(&self) -> KernelResult<Option<ExitPayload>> {
        self.find(OperationKind::SyscallResult, LABEL_EXIT)
            .next()
            .map(|e| payload::decode(Self::retained(e)?))
            .transpose()
    }
}
