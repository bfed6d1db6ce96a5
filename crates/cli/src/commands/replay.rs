// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::parse_cage_id;
use cage_persistence::{read_witness_log, CageStore};
use cage_runtime::{replay, ExitCategory};
use serde_json::json;
use std::path::PathBuf;

/// Re-execute a recorded run and report the first divergence, if any.
pub fn run(store: &CageStore, id: &str, witness_log: Option<PathBuf>) -> anyhow::Result<i32> {
    let id = parse_cage_id(id)?;
    let config = store.load_resolved(&id)?;
    let path = witness_log.unwrap_or_else(|| config.witness_output_path.clone());
    let log = read_witness_log(&path)?;

    // The stored summary only describes this log if the roots agree.
    let original = store
        .load_result(&id)?
        .filter(|s| s.witness_root.is_some() && s.witness_root == log.merkle_root());

    let outcome = replay(&log, &config, original.as_ref())?;
    let identical = outcome.is_identical();
    let report = json!({
        "status": if identical { "identical" } else { "diverged" },
        "divergence": outcome.divergence,
        "replayed": outcome.result.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if identical {
        0
    } else {
        ExitCategory::Divergence.code()
    })
}
