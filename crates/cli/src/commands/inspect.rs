// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use crate::parse_cage_id;
use cage_kernel::hash::short_hex;
use cage_persistence::witness_file::read_witness_file;
use cage_persistence::CageStore;

pub fn run(store: &CageStore, id: &str) -> anyhow::Result<()> {
    let id = parse_cage_id(id)?;
    let meta = store.load_meta(&id)?;
    let config = store.load_resolved(&id)?;

    println!("\nCage {id}");
    println!("--------------------------------------------");
    println!("Created:  {}", meta.created_at);
    println!("Policy:   {} ({:?})", short_hex(&config.effective_policy().digest()), config.deny_action);
    println!("Witness:  {}", config.witness_output_path.display());

    let mut files = Table::new();
    files
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["File", "Size"]);
    for (name, size) in store.files(&id)? {
        files.add_row(vec![name, format!("{size} bytes")]);
    }
    println!("{files}\n");

    if !config.witness_output_path.exists() {
        println!("No witness recorded yet.\n");
        return Ok(());
    }

    let (header, log) = match read_witness_file(&config.witness_output_path) {
        Ok(parsed) => parsed,
        Err(e) => {
            println!("Witness CORRUPT: {e}\n");
            return Ok(());
        }
    };
    let status = if header.is_sealed() {
        format!("SEALED root {}", log.merkle_root().map(|r| short_hex(&r)).unwrap_or_default())
    } else {
        "TRUNCATED".to_string()
    };
    println!("Witness:  {} entries, {}", log.len(), status);

    let mut entries = Table::new();
    entries
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Seq", "Kind", "Label", "Payload", "Entry", "Retained"]);
    for e in log.entries() {
        entries.add_row(vec![
            e.sequence_number.to_string(),
            e.operation_kind.to_string(),
            e.label.clone(),
            short_hex(&e.operation_payload_hash),
            short_hex(&e.entry_hash),
            if e.payload.is_some() { "yes".into() } else { "-".to_string() },
        ]);
    }
    println!("{entries}\n");

    if let Some(summary) = store.load_result(&id)? {
        println!("Last result: exit {}, execution hash {}\n", summary.exit_code, short_hex(&summary.execution_hash));
    }
    Ok(())
}
