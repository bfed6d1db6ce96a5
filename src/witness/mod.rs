// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Witness recording.

pub mod entry;
pub mod log;
pub mod payload;
pub mod recorder;

pub use entry::{compute_entry_hash, payload_hash, OperationKind, WitnessEntry};
pub use log::WitnessLog;
pub use recorder::{MemorySink, WitnessRecorder, WitnessSink};
