// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Tampering with a witness file on disk.

#![cfg(target_os = "linux")]

use cage_kernel::error::IntegrityError;
use cage_kernel::types::{CageConfig, Workload};
use cage_kernel::verify::verify_integrity;
use cage_persistence::read_witness_log;
use cage_runtime::{replay, Cage, ReplayError};
use std::path::Path;
use tempfile::tempdir;

const WORKLOAD: &str = env!("CARGO_BIN_EXE_cage-workload");

fn recorded(path: &Path) -> CageConfig {
    let config = CageConfig::recording([0u8; 32], path);
    Cage::new(config.clone())
        .execute(&Workload::new(WORKLOAD).arg("random").arg("32"))
        .unwrap();
    config
}

fn flip_at(path: &Path, offset: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[offset] ^= 0x01;
    std::fs::write(path, bytes).unwrap();
}

fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle not in file")
}

#[test]
fn test_flipped_payload_hash_is_root_mismatch() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("w.log");
    recorded(&path);

    let log = read_witness_log(&path).unwrap();
    let target = log.entries().iter().find(|e| e.label == "stdout").unwrap().clone();
    let bytes = std::fs::read(&path).unwrap();
    flip_at(&path, find(&bytes, &target.operation_payload_hash));

    let tampered = read_witness_log(&path).unwrap();
    match verify_integrity(&tampered, 2) {
        Err(IntegrityError::RootMismatch { first_fault, .. }) => {
            assert_eq!(first_fault.unwrap().sequence_number, target.sequence_number);
        }
        other => panic!("expected root mismatch, got {other:?}"),
    }
}

#[test]
fn test_flipped_root_is_root_mismatch() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("w.log");
    recorded(&path);

    let len = std::fs::metadata(&path).unwrap().len() as usize;
    flip_at(&path, len - 1);

    let tampered = read_witness_log(&path).unwrap();
    assert!(matches!(
        verify_integrity(&tampered, 2),
        Err(IntegrityError::RootMismatch { first_fault: None, .. })
    ));
}

#[test]
fn test_tampered_log_is_never_replayed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("w.log");
    let config = recorded(&path);

    let log = read_witness_log(&path).unwrap();
    let target = log.entries()[1].clone();
    let bytes = std::fs::read(&path).unwrap();
    flip_at(&path, find(&bytes, &target.entry_hash));

    let tampered = read_witness_log(&path).unwrap();
    assert!(matches!(
        replay(&tampered, &config, None),
        Err(ReplayError::Integrity(IntegrityError::RootMismatch { .. }))
    ));
}
