// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::parse_cage_id;
use anyhow::Context;
use cage_kernel::proof::ProofDocument;
use cage_kernel::verify::verify_integrity;
use cage_persistence::{read_witness_log, CageStore};
use std::path::PathBuf;

/// Export an inclusion proof for one entry. The log is verified first; a
/// proof against an unverified root proves nothing.
pub fn run(
    store: &CageStore,
    id: &str,
    entry: u64,
    witness_log: Option<PathBuf>,
    out: Option<PathBuf>,
) -> anyhow::Result<ProofDocument> {
    let id = parse_cage_id(id)?;
    let config = store.load_resolved(&id)?;
    let path = witness_log.unwrap_or_else(|| config.witness_output_path.clone());
    let log = read_witness_log(&path)?;
    verify_integrity(&log, config.merkle_workers)?;

    let doc = ProofDocument::from_log(&log, entry, config.merkle_workers)
        .with_context(|| format!("no proof for entry {entry} of {} entries", log.len()))?
        .with_cage_id(id.to_string());
    let json = serde_json::to_string_pretty(&doc)?;

    match out {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(doc)
}
