// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Any bit flipped in any chained field must surface as a root mismatch.

use super::sample_log;
use crate::error::IntegrityError;
use crate::verify::{verify_against, verify_integrity};
use crate::witness::{OperationKind, WitnessEntry, WitnessLog};

fn rebuild(log: &WitnessLog, f: impl Fn(&mut WitnessEntry)) -> WitnessLog {
    let mut entries = log.entries().to_vec();
    for e in entries.iter_mut() {
        f(e);
    }
    WitnessLog::from_parts(entries, log.merkle_root(), log.is_truncated())
}

fn tamper_at(log: &WitnessLog, seq: u64, f: impl Fn(&mut WitnessEntry)) -> WitnessLog {
    rebuild(log, |e| {
        if e.sequence_number == seq {
            f(e)
        }
    })
}

fn assert_root_mismatch_at(log: &WitnessLog, seq: u64) {
    match verify_integrity(log, 1) {
        Err(IntegrityError::RootMismatch { first_fault, .. }) => {
            let fault = first_fault.expect("fault located");
            assert_eq!(fault.sequence_number, seq);
        }
        other => panic!("expected RootMismatch, got {other:?}"),
    }
}

#[test]
fn test_payload_hash_bit_flip() {
    let log = sample_log([0u8; 32], b"hello\n");
    for seq in 0..log.len() as u64 {
        for bit in [0usize, 7, 255] {
            let bad = tamper_at(&log, seq, |e| e.operation_payload_hash[bit / 8] ^= 1 << (bit % 8));
            assert_root_mismatch_at(&bad, seq);
        }
    }
}

#[test]
fn test_entry_hash_bit_flip() {
    let log = sample_log([0u8; 32], b"hello\n");
    let bad = tamper_at(&log, 3, |e| e.entry_hash[31] ^= 0x80);
    assert_root_mismatch_at(&bad, 3);
}

#[test]
fn test_sequence_number_and_kind_flip() {
    let log = sample_log([0u8; 32], b"hello\n");

    let bad = tamper_at(&log, 2, |e| e.sequence_number ^= 1);
    assert!(matches!(verify_integrity(&bad, 1), Err(IntegrityError::RootMismatch { .. })));

    let bad = tamper_at(&log, 6, |e| e.operation_kind = OperationKind::NetworkOut);
    assert_root_mismatch_at(&bad, 6);

    let bad = tamper_at(&log, 1, |e| e.label.push('x'));
    assert_root_mismatch_at(&bad, 1);
}

#[test]
fn test_root_bit_flip() {
    let log = sample_log([0u8; 32], b"hello\n");
    let mut root = log.merkle_root().unwrap();
    root[0] ^= 1;
    let bad = WitnessLog::from_parts(log.entries().to_vec(), Some(root), false);
    match verify_integrity(&bad, 1) {
        Err(IntegrityError::RootMismatch { first_fault, claimed, computed }) => {
            assert!(first_fault.is_none());
            assert_eq!(claimed, root);
            assert_eq!(computed, log.merkle_root().unwrap());
        }
        other => panic!("expected RootMismatch, got {other:?}"),
    }
}

#[test]
fn test_removed_entry_detected() {
    let log = sample_log([0u8; 32], b"hello\n");
    let mut entries = log.entries().to_vec();
    entries.remove(4);
    let bad = WitnessLog::from_parts(entries, log.merkle_root(), false);
    assert!(matches!(verify_integrity(&bad, 1), Err(IntegrityError::RootMismatch { .. })));
}

#[test]
fn test_retained_payload_tamper() {
    let log = sample_log([0u8; 32], b"hello\n");
    let bad = tamper_at(&log, 1, |e| {
        if let Some(p) = e.payload.as_mut() {
            p[0] ^= 1;
        }
    });
    assert_root_mismatch_at(&bad, 1);
    match verify_integrity(&bad, 1) {
        Err(IntegrityError::RootMismatch { first_fault: Some(fault), .. }) => {
            assert_eq!(fault.kind, OperationKind::EnvironmentRead);
            assert_eq!(fault.actual, log.entries()[1].entry_hash);
        }
        other => panic!("expected RootMismatch, got {other:?}"),
    }
}

#[test]
fn test_unsealed_and_truncated_logs_rejected() {
    let log = sample_log([0u8; 32], b"hello\n");
    let unsealed = WitnessLog::from_parts(log.entries().to_vec(), None, false);
    assert_eq!(verify_integrity(&unsealed, 1), Err(IntegrityError::NotSealed { truncated: false }));

    let truncated = WitnessLog::from_parts(log.entries().to_vec(), log.merkle_root(), true);
    assert_eq!(verify_integrity(&truncated, 1), Err(IntegrityError::NotSealed { truncated: true }));
}

#[test]
fn test_expected_root() {
    let log = sample_log([0u8; 32], b"hello\n");
    let root = log.merkle_root().unwrap();
    assert_eq!(verify_against(&log, &root, 1).unwrap(), root);
    assert!(matches!(
        verify_against(&log, &[0u8; 32], 1),
        Err(IntegrityError::RootMismatch { first_fault: None, .. })
    ));
}
