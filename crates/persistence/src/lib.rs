// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod error;
pub mod witness_file;
pub mod store;
pub mod fixtures;

pub use error::{PersistenceError, Result};
pub use store::CageStore;
pub use witness_file::{read_witness_log, WitnessFileHeader, WitnessFileWriter};
