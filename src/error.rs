// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use crate::hash::{to_hex, Hash};
use crate::policy::OperationId;
use crate::witness::OperationKind;
use thiserror::Error;

/// Rejected `CageConfig`. Never retried: the caller fixes the document and
/// creates a new cage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("recording is enabled but no deterministic seed was supplied")]
    MissingSeed,
    #[error("operation {0} is both allowed and denied")]
    ConflictingOperation(OperationId),
    #[error("operation {0} belongs to the safe subset and cannot be denied")]
    SafeOperationDenied(OperationId),
    #[error("resource limit {name} must be greater than zero")]
    InvalidLimit { name: &'static str },
    #[error("entropy pool of {requested} bytes exceeds the maximum of {max}")]
    EntropyBudgetTooLarge { requested: usize, max: usize },
    #[error("witness output path is empty")]
    EmptyWitnessPath,
    #[error("environment key {0:?} is invalid")]
    InvalidEnvironmentKey(String),
    #[error("merkle worker count must be at least 1")]
    NoMerkleWorkers,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("empty tree has no leaves to prove")]
    EmptyTree,
    #[error("leaf index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("witness log is sealed; no further entries may be recorded")]
    Sealed,
    #[error("witness log was truncated by an aborted run")]
    Truncated,
    #[error("witness sink failed: {0}")]
    Sink(#[from] std::io::Error),
    #[error("payload encoding failed: {0}")]
    Encoding(String),
    #[error("witness log would grow to {size} bytes, over the limit of {limit}")]
    WitnessTooLarge { size: u64, limit: u64 },
}

/// Location of the first entry whose stored hash disagrees with its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFault {
    pub sequence_number: u64,
    pub kind: OperationKind,
    pub expected: Hash,
    pub actual: Hash,
}

impl std::fmt::Display for EntryFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "entry {} ({}) expected {} found {}",
            self.sequence_number,
            self.kind,
            to_hex(&self.expected),
            to_hex(&self.actual)
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("witness log was never sealed (truncated: {truncated}); it cannot be verified")]
    NotSealed { truncated: bool },
    #[error("merkle root mismatch: claimed {} computed {}{}", to_hex(.claimed), to_hex(.computed), fault_suffix(.first_fault))]
    RootMismatch {
        claimed: Hash,
        computed: Hash,
        first_fault: Option<EntryFault>,
    },
    #[error("sequence gap at index {index}: found sequence number {found}")]
    SequenceGap { index: usize, found: u64 },
}

fn fault_suffix(fault: &Option<EntryFault>) -> String {
    match fault {
        Some(f) => format!(" (first fault: {f})"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error("entry {sequence_number} ({label}) has no retained payload")]
    MissingPayload { sequence_number: u64, label: String },
    #[error("witness log has no {0} entry")]
    MissingEntry(&'static str),
    #[error("encoding error: {0}")]
    Encoding(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("entry hash of entry {sequence_number} does not match its fields")]
    EntryHashMismatch { sequence_number: u64 },
    #[error("proof leaf does not match the entry")]
    LeafMismatch,
    #[error("inclusion path does not lead to root {}", to_hex(.root))]
    PathInvalid { root: Hash },
    #[error("unsupported proof version {0}")]
    UnsupportedVersion(u32),
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
