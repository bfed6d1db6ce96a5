// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::cage::CageState;
use crate::limits::Resource;
use cage_kernel::error::{ConfigError, IntegrityError, KernelError, RecorderError};
use cage_kernel::hash::to_hex;
use cage_kernel::policy::OperationId;
use cage_kernel::Hash;
use cage_persistence::PersistenceError;
use std::io;
use thiserror::Error;

/// Stable process exit codes, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCategory {
    Config,
    Filter,
    PolicyViolation,
    ResourceExhausted,
    RecorderIo,
    Integrity,
    Divergence,
    Internal,
}

impl ExitCategory {
    pub fn code(self) -> i32 {
        match self {
            ExitCategory::Internal => 70,
            ExitCategory::RecorderIo => 74,
            ExitCategory::Filter => 77,
            ExitCategory::Config => 78,
            ExitCategory::PolicyViolation => 79,
            ExitCategory::ResourceExhausted => 80,
            ExitCategory::Integrity => 81,
            ExitCategory::Divergence => 82,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExitCategory::Config => "config",
            ExitCategory::Filter => "filter",
            ExitCategory::PolicyViolation => "policy_violation",
            ExitCategory::ResourceExhausted => "resource_exhausted",
            ExitCategory::RecorderIo => "recorder_io",
            ExitCategory::Integrity => "integrity",
            ExitCategory::Divergence => "divergence",
            ExitCategory::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("no syscall filter backend is available on this platform")]
    Unsupported,
    #[error("unsupported target architecture {0}")]
    UnsupportedArch(String),
    #[error("failed to build syscall filter: {0}")]
    Build(String),
}

/// Failure to produce the inputs of an execution.
#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("recorded inputs unavailable: {0}")]
    Unavailable(#[from] KernelError),
    #[error("entropy draw at entry {sequence_number} re-derived to {} but {} was recorded", to_hex(.actual), to_hex(.expected))]
    EntropyMismatch {
        sequence_number: u64,
        expected: Hash,
        actual: Hash,
    },
    #[error("recorded entropy draw at counter {recorded} but the generator is at {current}")]
    CounterMismatch { recorded: u64, current: u64 },
    #[error("entropy is recorded but no deterministic seed is configured")]
    MissingSeed,
    #[error("entropy draw at entry {sequence_number} claims {len} bytes in {blocks} blocks")]
    EntropyOutOfBounds { sequence_number: u64, len: u64, blocks: u64 },
}

#[derive(Error, Debug)]
pub enum CageError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Syscall filter installation failed: {0}")]
    Filter(#[from] FilterError),
    #[error("Policy violation: {call} ({operation}) denied, workload killed")]
    PolicyViolation {
        operation: OperationId,
        call: String,
        sequence_number: Option<u64>,
    },
    #[error("Resource exhausted: {resource} limit {limit} exceeded (observed {observed})")]
    ResourceExhausted {
        resource: Resource,
        limit: u64,
        observed: u64,
    },
    #[error("Witness recorder failed: {0}")]
    RecorderIo(#[from] RecorderError),
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Intercept(#[from] InterceptError),
    #[error("Cage is {0:?}; a cage executes exactly once")]
    InvalidState(CageState),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CageError {
    pub fn category(&self) -> ExitCategory {
        match self {
            CageError::Config(_) | CageError::InvalidState(_) => ExitCategory::Config,
            CageError::Filter(_) => ExitCategory::Filter,
            CageError::PolicyViolation { .. } => ExitCategory::PolicyViolation,
            CageError::ResourceExhausted { .. } => ExitCategory::ResourceExhausted,
            CageError::RecorderIo(_) => ExitCategory::RecorderIo,
            CageError::Intercept(_) => ExitCategory::Integrity,
            CageError::Spawn { .. } | CageError::Internal(_) => ExitCategory::Internal,
        }
    }
}

impl From<PersistenceError> for CageError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::IoError(io) => CageError::RecorderIo(RecorderError::Sink(io)),
            PersistenceError::Recorder(r) => CageError::RecorderIo(r),
            PersistenceError::Config(c) => CageError::Config(c),
            other => CageError::Internal(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Witness log failed verification: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("Replay requires the deterministic seed of the original run")]
    MissingSeed,
    #[error("Recorded policy {} differs from configured policy {}", to_hex(.recorded), to_hex(.configured))]
    PolicyMismatch { recorded: Hash, configured: Hash },
    #[error("Log cannot drive a replay: {0}")]
    NotReplayable(#[from] KernelError),
    #[error("Re-execution failed: {0}")]
    Cage(#[from] CageError),
}

impl ReplayError {
    pub fn category(&self) -> ExitCategory {
        match self {
            ReplayError::Integrity(_) | ReplayError::NotReplayable(_) => ExitCategory::Integrity,
            ReplayError::MissingSeed => ExitCategory::Config,
            ReplayError::PolicyMismatch { .. } => ExitCategory::Divergence,
            ReplayError::Cage(e) => e.category(),
        }
    }
}
