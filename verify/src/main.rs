// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Offline verifier: checks witness logs and exported proofs without a
//! cage store, a config or the runtime.

use anyhow::{Context, Result};
use cage_kernel::hash::{from_hex, to_hex};
use cage_kernel::proof::ProofDocument;
use cage_kernel::verify::{verify_against, verify_integrity};
use cage_kernel::config::DEFAULT_MERKLE_WORKERS;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Matches the cage CLI's integrity failure code.
const INTEGRITY_FAILURE: u8 = 81;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a witness log file: hash chain, Merkle root, contiguity
    Log {
        path: PathBuf,

        /// Root the log must have
        #[arg(long)]
        root: Option<String>,
    },
    /// Verify an exported inclusion proof (JSON)
    Proof {
        path: PathBuf,
    },
}

fn verify_log(path: &PathBuf, root: Option<&str>) -> Result<bool> {
    let log = cage_persistence::read_witness_log(path)
        .with_context(|| format!("Failed to read witness log {}", path.display()))?;

    let verdict = match root {
        Some(hex) => {
            let expected = from_hex(hex).with_context(|| format!("Invalid root {hex:?}"))?;
            verify_against(&log, &expected, DEFAULT_MERKLE_WORKERS)
        }
        None => verify_integrity(&log, DEFAULT_MERKLE_WORKERS),
    };

    let report = match &verdict {
        Ok(root) => json!({
            "status": "verified",
            "entries": log.len(),
            "merkle_root": to_hex(root),
        }),
        Err(e) => json!({
            "status": "failed",
            "entries": log.len(),
            "error": e.to_string(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(verdict.is_ok())
}

fn verify_proof(path: &PathBuf) -> Result<bool> {
    let raw = fs::read(path).with_context(|| format!("Failed to read proof {}", path.display()))?;
    let doc: ProofDocument = serde_json::from_slice(&raw).context("Failed to parse proof document")?;

    let verdict = doc.verify();
    let report = json!({
        "status": if verdict.is_ok() { "verified" } else { "failed" },
        "sequence_number": doc.sequence_number,
        "operation_kind": doc.operation_kind,
        "merkle_root": to_hex(&doc.merkle_root),
        "error": verdict.as_ref().err().map(|e| e.to_string()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(verdict.is_ok())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    eprintln!("Cage Verifier v{}", env!("CARGO_PKG_VERSION"));

    let ok = match &args.command {
        Command::Log { path, root } => verify_log(path, root.as_deref())?,
        Command::Proof { path } => verify_proof(path)?,
    };
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(INTEGRITY_FAILURE)
    })
}
