// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::parse_cage_id;
use cage_kernel::error::IntegrityError;
use cage_kernel::hash::{from_hex, to_hex};
use cage_kernel::types::ExecutionSummary;
use cage_kernel::verify::{verify_against, verify_integrity};
use cage_kernel::witness::WitnessLog;
use cage_kernel::Hash;
use cage_persistence::{read_witness_log, CageStore};
use cage_runtime::ExitCategory;
use serde_json::{json, Value};
use std::path::PathBuf;

fn failure_report(err: &IntegrityError) -> Value {
    match err {
        IntegrityError::NotSealed { truncated } => json!({
            "status": "failed",
            "error": "not_sealed",
            "truncated": truncated,
        }),
        IntegrityError::RootMismatch {
            claimed,
            computed,
            first_fault,
        } => json!({
            "status": "failed",
            "error": "root_mismatch",
            "claimed": to_hex(claimed),
            "computed": to_hex(computed),
            "first_fault": first_fault.as_ref().map(|f| json!({
                "sequence_number": f.sequence_number,
                "kind": f.kind.as_str(),
                "expected": to_hex(&f.expected),
                "actual": to_hex(&f.actual),
            })),
        }),
        IntegrityError::SequenceGap { index, found } => json!({
            "status": "failed",
            "error": "sequence_gap",
            "index": index,
            "found": found,
        }),
    }
}

/// `expected` is either the log's Merkle root or the execution hash of the
/// stored result. The result only counts when its own hash is consistent;
/// the log must then carry the root that result names.
fn verify_expected(
    log: &WitnessLog,
    expected: &Hash,
    result: Option<&ExecutionSummary>,
    workers: usize,
) -> Result<(Hash, &'static str), IntegrityError> {
    let named_root = result
        .filter(|s| s.is_consistent() && &s.execution_hash == expected)
        .and_then(|s| s.witness_root);
    match named_root {
        Some(root) => verify_against(log, &root, workers).map(|root| (root, "execution_hash")),
        None => verify_against(log, expected, workers).map(|root| (root, "merkle_root")),
    }
}

/// Verify a witness log, optionally against an expected root or execution
/// hash. Prints a
/// JSON report either way and returns the exit code.
pub fn run(
    store: &CageStore,
    id: &str,
    witness_log: Option<PathBuf>,
    expected_hash: Option<&str>,
) -> anyhow::Result<i32> {
    let id = parse_cage_id(id)?;
    let config = store.load_resolved(&id)?;
    let path = witness_log.unwrap_or_else(|| config.witness_output_path.clone());
    let log = read_witness_log(&path)?;

    let verdict = match expected_hash {
        Some(hex) => {
            let expected = from_hex(hex).map_err(|e| anyhow::anyhow!("invalid expected hash {hex:?}: {e}"))?;
            let result = store.load_result(&id)?;
            verify_expected(&log, &expected, result.as_ref(), config.merkle_workers)
                .map(|(root, matched)| (root, Some(matched)))
        }
        None => verify_integrity(&log, config.merkle_workers).map(|root| (root, None)),
    };

    let (report, code) = match &verdict {
        Ok((root, matched)) => (
            json!({
                "status": "verified",
                "cage_id": id.to_string(),
                "entries": log.len(),
                "merkle_root": to_hex(root),
                "matched": matched,
            }),
            0,
        ),
        Err(e) => {
            tracing::warn!("Verification of {} failed: {}", path.display(), e);
            (failure_report(e), ExitCategory::Integrity.code())
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(code)
}
