// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Execution results.

use crate::config::DOMAIN_EXECUTION;
use crate::hash::{hash_bytes, serde_hex, serde_hex_opt, CanonicalHasher, Hash};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `H(exit_code ‖ H(stdout) ‖ H(stderr) ‖ witness_root)`.
/// Wall time is not covered.
pub fn compute_execution_hash(
    exit_code: i32,
    stdout_hash: &Hash,
    stderr_hash: &Hash,
    witness_root: Option<&Hash>,
) -> Hash {
    let mut h = CanonicalHasher::new(DOMAIN_EXECUTION);
    h.update_i32(exit_code)
        .update_hash(stdout_hash)
        .update_hash(stderr_hash)
        .update_opt_hash(witness_root);
    h.finalize()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_time: Duration,
    pub witness_root: Option<Hash>,
    pub execution_hash: Hash,
}

impl ExecutionResult {
    pub fn new(
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        wall_time: Duration,
        witness_root: Option<Hash>,
    ) -> Self {
        let execution_hash = compute_execution_hash(
            exit_code,
            &hash_bytes(&stdout),
            &hash_bytes(&stderr),
            witness_root.as_ref(),
        );
        Self {
            exit_code,
            stdout,
            stderr,
            wall_time,
            witness_root,
            execution_hash,
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            exit_code: self.exit_code,
            stdout_hash: hash_bytes(&self.stdout),
            stderr_hash: hash_bytes(&self.stderr),
            stdout_len: self.stdout.len() as u64,
            stderr_len: self.stderr.len() as u64,
            wall_time_ms: self.wall_time.as_millis() as u64,
            witness_root: self.witness_root,
            execution_hash: self.execution_hash,
        }
    }
}

/// Persisted form of an `ExecutionResult`: digests instead of streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub exit_code: i32,
    #[serde(with = "serde_hex")]
    pub stdout_hash: Hash,
    #[serde(with = "serde_hex")]
    pub stderr_hash: Hash,
    pub stdout_len: u64,
    pub stderr_len: u64,
    pub wall_time_ms: u64,
    #[serde(with = "serde_hex_opt")]
    pub witness_root: Option<Hash>,
    #[serde(with = "serde_hex")]
    pub execution_hash: Hash,
}

impl ExecutionSummary {
    pub fn recompute_hash(&self) -> Hash {
        compute_execution_hash(
            self.exit_code,
            &self.stdout_hash,
            &self.stderr_hash,
            self.witness_root.as_ref(),
        )
    }

    /// True when the stored execution hash matches the stored digests.
    pub fn is_consistent(&self) -> bool {
        self.recompute_hash() == self.execution_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_time_not_hashed() {
        let a = ExecutionResult::new(0, b"out".to_vec(), vec![], Duration::from_millis(5), Some([1u8; 32]));
        let b = ExecutionResult::new(0, b"out".to_vec(), vec![], Duration::from_secs(9), Some([1u8; 32]));
        assert_eq!(a.execution_hash, b.execution_hash);
    }

    #[test]
    fn test_root_presence_is_hashed() {
        let a = ExecutionResult::new(0, vec![], vec![], Duration::ZERO, None);
        let b = ExecutionResult::new(0, vec![], vec![], Duration::ZERO, Some([0u8; 32]));
        assert_ne!(a.execution_hash, b.execution_hash);
    }

    #[test]
    fn test_summary_recomputes() {
        let r = ExecutionResult::new(3, b"a".to_vec(), b"b".to_vec(), Duration::ZERO, Some([9u8; 32]));
        let mut s = r.summary();
        assert!(s.is_consistent());
        s.exit_code = 4;
        assert!(!s.is_consistent());
    }
}
