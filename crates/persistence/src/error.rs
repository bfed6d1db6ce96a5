// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cage_kernel::error::{ConfigError, RecorderError};
use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Invalid magic bytes in header")]
    InvalidMagic,
    #[error("Unsupported witness format version {0}")]
    UnsupportedVersion(u32),
    #[error("Checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        expected: u64,
        found: u64,
    },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),
    #[error("Cage not found: {0}")]
    CageNotFound(String),
    #[error("Stored configuration of cage {0} does not match its id")]
    ConfigTampered(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
