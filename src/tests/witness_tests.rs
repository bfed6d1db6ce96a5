// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::sample_log;
use crate::config::GENESIS_HASH;
use crate::drg::DeterministicRandomState;
use crate::verify::verify_integrity;
use crate::witness::payload::{decode, EntropyPayload};
use crate::witness::{MemorySink, OperationKind, WitnessRecorder};

#[test]
fn test_sequence_numbers_contiguous_and_chained() {
    let log = sample_log([0u8; 32], b"hello\n");

    let mut previous = GENESIS_HASH;
    for (i, entry) in log.entries().iter().enumerate() {
        assert_eq!(entry.sequence_number, i as u64);
        assert_eq!(entry.recompute_hash(&previous), entry.entry_hash);
        previous = entry.entry_hash;
    }
    assert!(log.is_sealed());
    assert_eq!(verify_integrity(&log, 1).unwrap(), log.merkle_root().unwrap());
}

#[test]
fn test_randomness_recorded_by_hash_only() {
    let mut drg = DeterministicRandomState::new([3u8; 32]);
    let draw = drg.next_bytes(96);

    let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
    rec.record_randomness(&draw).unwrap();

    let entry = &rec.log().entries()[0];
    assert_eq!(entry.operation_kind, OperationKind::RandomnessInjection);
    let payload: EntropyPayload = decode(entry.payload.as_deref().unwrap()).unwrap();
    assert_eq!(payload.counter, 0);
    assert_eq!(payload.blocks, 2);
    assert_eq!(payload.len, 96);
    assert_eq!(payload.output_hash, draw.output_hash());

    let raw = entry.payload.as_deref().unwrap();
    assert!(!raw.windows(draw.bytes.len()).any(|w| w == draw.bytes.as_slice()));
}

#[test]
fn test_batching_and_workers_do_not_change_root() {
    let build = |batch: usize, workers: usize| {
        let mut rec = WitnessRecorder::new(MemorySink::default(), false, workers).with_batch_size(batch);
        for i in 0..600u32 {
            rec.record(OperationKind::SyscallResult, "op", &i.to_le_bytes()).unwrap();
        }
        rec.seal().unwrap()
    };

    let reference = build(1, 1);
    assert_eq!(build(64, 4), reference);
    assert_eq!(build(1000, 8), reference);
}

#[test]
fn test_sink_mirrors_log() {
    let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
    rec.record_environment("PATH", "/usr/bin").unwrap();
    rec.record(OperationKind::FileWrite, "stdout", b"x").unwrap();
    let root = rec.seal().unwrap();

    let (log, sink) = rec.into_parts();
    assert_eq!(sink.entries, log.entries());
    assert_eq!(sink.root, Some(root));
}

#[test]
fn test_retain_inputs_off_keeps_no_raw_input() {
    let mut rec = WitnessRecorder::new(MemorySink::default(), false, 1);
    rec.record_environment("SECRET", "hunter2").unwrap();
    rec.record_input(OperationKind::FileRead, "stdin", b"data").unwrap();
    assert!(rec.log().entries().iter().all(|e| e.payload.is_none()));
}
