// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod commands;

use anyhow::Context;
use cage_kernel::types::CageId;
use cage_runtime::{CageError, ExitCategory, ReplayError};

pub fn parse_cage_id(id: &str) -> anyhow::Result<CageId> {
    id.parse::<CageId>()
        .with_context(|| format!("invalid cage id {id:?}: expected 32 hex characters"))
}

/// Process exit code for a failed command.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CageError>() {
            return e.category().code();
        }
        if let Some(e) = cause.downcast_ref::<ReplayError>() {
            return e.category().code();
        }
        if cause.downcast_ref::<cage_kernel::error::IntegrityError>().is_some() {
            return ExitCategory::Integrity.code();
        }
        if let Some(e) = cause.downcast_ref::<cage_persistence::PersistenceError>() {
            return match e {
                cage_persistence::PersistenceError::Config(_)
                | cage_persistence::PersistenceError::CageNotFound(_)
                | cage_persistence::PersistenceError::ConfigTampered(_) => ExitCategory::Config.code(),
                _ => ExitCategory::RecorderIo.code(),
            };
        }
    }
    ExitCategory::Internal.code()
}
