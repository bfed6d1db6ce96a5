// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![cfg(target_os = "linux")]

use cage_kernel::replay::DivergenceReport;
use cage_kernel::types::{CageConfig, ExecutionResult, Workload};
use cage_kernel::witness::WitnessLog;
use cage_persistence::read_witness_log;
use cage_runtime::errors::InterceptError;
use cage_runtime::{replay, Cage, CageError, ReplayError};
use std::path::Path;
use tempfile::tempdir;

const WORKLOAD: &str = env!("CARGO_BIN_EXE_cage-workload");

fn record(config: &CageConfig, workload: &Workload) -> (ExecutionResult, WitnessLog) {
    let mut cage = Cage::new(config.clone());
    let result = cage.execute(workload).unwrap();
    let log = read_witness_log(&config.witness_output_path).unwrap();
    assert_eq!(cage.witness_log(), Some(&log));
    (result, log)
}

fn config(witness: &Path) -> CageConfig {
    let mut config = CageConfig::recording([0u8; 32], witness).with_env("LC_ALL", "C");
    config.entropy_bytes = 96;
    config
}

#[test]
fn test_replay_reproduces_random_workload() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("w.log"));
    let (original, log) = record(&config, &Workload::new(WORKLOAD).arg("random").arg("96"));

    let outcome = replay(&log, &config, Some(&original.summary())).unwrap();
    assert!(outcome.is_identical(), "{:?}", outcome.divergence);
    assert_eq!(outcome.result.stdout, original.stdout);
    assert_eq!(outcome.result.witness_root, original.witness_root);
    assert_eq!(outcome.log.entries(), log.entries());
}

#[test]
fn test_replay_feeds_recorded_stdin() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("w.log"));
    let workload = Workload::new(WORKLOAD).arg("echo").stdin(b"recorded stdin".to_vec());
    let (original, log) = record(&config, &workload);

    let outcome = replay(&log, &config, None).unwrap();
    assert!(outcome.is_identical());
    assert_eq!(outcome.result.stdout, b"recorded stdin");
    assert_eq!(outcome.result.execution_hash, original.execution_hash);
}

#[test]
fn test_replay_does_not_touch_original_file() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("w.log"));
    let (_, log) = record(&config, &Workload::new(WORKLOAD).arg("exit").arg("0"));
    let before = std::fs::read(&config.witness_output_path).unwrap();

    replay(&log, &config, None).unwrap();
    assert_eq!(std::fs::read(&config.witness_output_path).unwrap(), before);
}

#[test]
fn test_wrong_seed_fails_entropy_check() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("w.log"));
    let (_, log) = record(&config, &Workload::new(WORKLOAD).arg("random").arg("16"));

    let other = CageConfig {
        deterministic_seed: Some([5u8; 32]),
        ..config
    };
    let err = replay(&log, &other, None).unwrap_err();
    assert!(matches!(
        err,
        ReplayError::Cage(CageError::Intercept(InterceptError::EntropyMismatch { .. }))
    ));
}

#[test]
fn test_changed_outcome_reports_exit_code() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("w.log"));
    let (original, log) = record(&config, &Workload::new(WORKLOAD).arg("exit").arg("0"));

    // A summary that disagrees with the log only in its exit code.
    let mut summary = original.summary();
    summary.exit_code = 3;
    summary.execution_hash = summary.recompute_hash();

    let outcome = replay(&log, &config, Some(&summary)).unwrap();
    assert!(matches!(
        outcome.divergence,
        Some(DivergenceReport::ExitCode { original: 3, replayed: 0 })
    ));
}
