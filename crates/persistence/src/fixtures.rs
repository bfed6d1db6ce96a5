// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! On-disk scenarios for tests of the tools built on this crate.

use crate::error::{PersistenceError, Result};
use crate::store::CageStore;
use crate::witness_file::WitnessFileWriter;

use cage_kernel::drg::DeterministicRandomState;
use cage_kernel::types::{CageConfig, CageId, ExecutionResult};
use cage_kernel::witness::payload::{LABEL_STDERR, LABEL_STDIN, LABEL_STDOUT};
use cage_kernel::witness::{OperationKind, WitnessRecorder};
use cage_kernel::Hash;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct TestPaths {
    pub store: PathBuf,
    pub cage_id: CageId,
    pub sealed_log: PathBuf,
    pub truncated_log: PathBuf,
    pub root: Hash,
    pub execution_hash: Hash,
}

fn record(path: &Path, config: &CageConfig, stdout: &[u8], seal: bool) -> Result<Option<Hash>> {
    let writer = WitnessFileWriter::create(path)?;
    let mut rec = WitnessRecorder::new(writer, config.retain_inputs, config.merkle_workers);
    let mut drg = DeterministicRandomState::new(config.deterministic_seed.unwrap_or_default());

    rec.record_policy(&config.effective_policy())?;
    for (key, value) in &config.environment {
        rec.record_environment(key, value)?;
    }
    rec.record_invocation("/bin/echo", &["hello".to_string()])?;
    rec.record_input(OperationKind::FileRead, LABEL_STDIN, b"")?;
    rec.record_randomness(&drg.next_bytes(config.entropy_bytes))?;
    rec.record(OperationKind::FileWrite, LABEL_STDOUT, stdout)?;

    if !seal {
        rec.abort()?;
        return Ok(None);
    }
    rec.record(OperationKind::FileWrite, LABEL_STDERR, b"")?;
    rec.record_exit(0, None)?;
    Ok(Some(rec.seal()?))
}

/// A store holding one cage with a sealed witness and stored result, plus a
/// truncated log next to it.
pub fn generate_test_scenario(dir: &Path) -> Result<TestPaths> {
    let store_root = dir.join("store");
    let store = CageStore::open(&store_root)?;

    let config = CageConfig::recording([0u8; 32], "witness.log")
        .with_env("LC_ALL", "C")
        .with_env("TZ", "UTC");
    let cage_id = store.create(&config, "2025-01-01T00:00:00Z")?;
    let resolved = store.load_resolved(&cage_id)?;

    let sealed_log = resolved.witness_output_path.clone();
    let root = record(&sealed_log, &resolved, b"hello\n", true)?
        .ok_or_else(|| PersistenceError::InvalidFormat("fixture was not sealed".into()))?;

    let result = ExecutionResult::new(0, b"hello\n".to_vec(), Vec::new(), Duration::from_millis(1), Some(root));
    store.save_result(&cage_id, &result.summary())?;

    let truncated_log = dir.join("truncated.log");
    record(&truncated_log, &resolved, b"partial", false)?;

    Ok(TestPaths {
        store: store_root,
        cage_id,
        sealed_log,
        truncated_log,
        root,
        execution_hash: result.execution_hash,
    })
}
