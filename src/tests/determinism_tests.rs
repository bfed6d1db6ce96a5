// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::sample_log;
use crate::policy::OperationId;
use crate::types::{CageConfig, CageId, ExecutionResult};
use std::time::Duration;

#[test]
fn test_same_seed_same_root() {
    let a = sample_log([0u8; 32], b"hello\n");
    let b = sample_log([0u8; 32], b"hello\n");
    assert_eq!(a, b);
    assert_eq!(a.merkle_root(), b.merkle_root());
}

#[test]
fn test_seed_changes_root() {
    let a = sample_log([0u8; 32], b"hello\n");
    let b = sample_log([1u8; 32], b"hello\n");
    assert_ne!(a.merkle_root(), b.merkle_root());
}

#[test]
fn test_execution_hash_tracks_inputs() {
    let a = sample_log([0u8; 32], b"x");
    let b = sample_log([1u8; 32], b"x");
    let ra = ExecutionResult::new(0, b"x".to_vec(), vec![], Duration::from_millis(1), a.merkle_root());
    let ra2 = ExecutionResult::new(0, b"x".to_vec(), vec![], Duration::from_millis(7), a.merkle_root());
    let rb = ExecutionResult::new(0, b"x".to_vec(), vec![], Duration::from_millis(1), b.merkle_root());

    assert_eq!(ra.execution_hash, ra2.execution_hash);
    assert_ne!(ra.execution_hash, rb.execution_hash);
}

#[test]
fn test_cage_id_is_content_address() {
    let a = serde_json::to_vec(&CageConfig::recording([0u8; 32], "w.log")).unwrap();
    let b = serde_json::to_vec(&CageConfig::recording([0u8; 32], "w.log")).unwrap();
    let c = serde_json::to_vec(
        &CageConfig::recording([0u8; 32], "w.log").with_denied([OperationId::WallClockRead]),
    )
    .unwrap();

    let id = CageId::from_canonical_config(&a);
    assert_eq!(id, CageId::from_canonical_config(&b));
    assert_ne!(id, CageId::from_canonical_config(&c));
    assert_eq!(id.to_string().parse::<CageId>().unwrap(), id);
}
