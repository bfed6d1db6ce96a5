// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Cage store: content-addressed cage directories.
//!
//! ```text
//! <root>/<cage-id>/
//!     config.json   the CageConfig the id was derived from
//!     meta.json     creation metadata, never hashed
//!     witness.log   witness of the latest execution
//!     result.json   ExecutionSummary of the latest execution
//!     work/         working directory for filesystem-isolated runs
//! ```

use crate::error::{PersistenceError, Result};
use cage_kernel::types::{CageConfig, CageId, ExecutionSummary};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const META_FILE: &str = "meta.json";
pub const RESULT_FILE: &str = "result.json";
pub const WORK_DIR: &str = "work";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CageMeta {
    pub cage_id: String,
    pub created_at: String,
    pub format_version: u32,
}

/// Canonical bytes of a config: compact JSON in declaration order, sets
/// and maps sorted.
pub fn canonical_config_bytes(config: &CageConfig) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(config)?)
}

pub fn cage_id_for(config: &CageConfig) -> Result<CageId> {
    Ok(CageId::from_canonical_config(&canonical_config_bytes(config)?))
}

#[derive(Debug, Clone)]
pub struct CageStore {
    root: PathBuf,
}

impl CageStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cage_dir(&self, id: &CageId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn exists(&self, id: &CageId) -> bool {
        self.cage_dir(id).join(CONFIG_FILE).is_file()
    }

    /// Validate and store a config. Creating the same config twice returns
    /// the same id and leaves the first copy untouched.
    pub fn create(&self, config: &CageConfig, created_at: &str) -> Result<CageId> {
        config.validate()?;
        let id = cage_id_for(config)?;
        let dir = self.cage_dir(&id);
        if self.exists(&id) {
            return Ok(id);
        }

        fs::create_dir_all(dir.join(WORK_DIR))?;
        fs::write(dir.join(CONFIG_FILE), serde_json::to_vec_pretty(config)?)?;
        let meta = CageMeta {
            cage_id: id.to_string(),
            created_at: created_at.to_string(),
            format_version: cage_kernel::config::WITNESS_FORMAT_VERSION,
        };
        fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&meta)?)?;
        Ok(id)
    }

    /// Load a stored config, checking it still hashes to its id.
    pub fn load_config(&self, id: &CageId) -> Result<CageConfig> {
        let path = self.cage_dir(id).join(CONFIG_FILE);
        if !path.is_file() {
            return Err(PersistenceError::CageNotFound(id.to_string()));
        }
        let config: CageConfig = serde_json::from_slice(&fs::read(path)?)?;
        if cage_id_for(&config)? != *id {
            return Err(PersistenceError::ConfigTampered(id.to_string()));
        }
        Ok(config)
    }

    /// Config with its witness path and work dir anchored in the cage dir.
    pub fn load_resolved(&self, id: &CageId) -> Result<CageConfig> {
        let dir = self.cage_dir(id);
        let mut config = self.load_config(id)?.resolved_in(&dir);
        if config.isolation_flags.filesystem_isolated && config.work_dir.is_none() {
            config.work_dir = Some(dir.join(WORK_DIR));
        }
        Ok(config)
    }

    pub fn load_meta(&self, id: &CageId) -> Result<CageMeta> {
        let path = self.cage_dir(id).join(META_FILE);
        if !path.is_file() {
            return Err(PersistenceError::CageNotFound(id.to_string()));
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    pub fn witness_path(&self, id: &CageId) -> Result<PathBuf> {
        Ok(self.load_resolved(id)?.witness_output_path)
    }

    pub fn save_result(&self, id: &CageId, summary: &ExecutionSummary) -> Result<()> {
        let path = self.cage_dir(id).join(RESULT_FILE);
        fs::write(path, serde_json::to_vec_pretty(summary)?)?;
        Ok(())
    }

    pub fn load_result(&self, id: &CageId) -> Result<Option<ExecutionSummary>> {
        let path = self.cage_dir(id).join(RESULT_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
    }

    pub fn list(&self) -> Result<Vec<CageId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<CageId>().ok()) {
                if self.exists(&id) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Files in a cage directory with their sizes, sorted by name.
    pub fn files(&self, id: &CageId) -> Result<Vec<(String, u64)>> {
        let dir = self.cage_dir(id);
        if !dir.is_dir() {
            return Err(PersistenceError::CageNotFound(id.to_string()));
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() {
                files.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
            }
        }
        files.sort();
        Ok(files)
    }
}
