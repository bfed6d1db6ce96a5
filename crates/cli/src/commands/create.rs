// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use cage_kernel::types::{CageConfig, CageId};
use cage_persistence::CageStore;
use std::path::Path;

pub fn run(store: &CageStore, config_path: &Path) -> anyhow::Result<CageId> {
    let raw = std::fs::read(config_path)
        .with_context(|| format!("reading config {}", config_path.display()))?;
    let config: CageConfig = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing config {}", config_path.display()))?;

    let id = store.create(&config, &chrono::Utc::now().to_rfc3339())?;
    tracing::info!("Cage {} stored under {}", id, store.cage_dir(&id).display());
    println!("{id}");
    Ok(id)
}
