// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Cage runtime: the host side of the determinism cage.
//!
//! Compiles the syscall policy, prepares the workload's inputs, supervises
//! the child and streams the witness. The pure parts (hashing, DRG, witness
//! log, verification) live in `cage_kernel`.

pub mod cage;
pub mod errors;
pub mod filter;
pub mod interceptor;
pub mod limits;
pub mod process;
pub mod replay;
pub mod telemetry;
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
pub mod trace;

pub use cage::{Cage, CageState, CageStats};
pub use errors::{CageError, ExitCategory, FilterError, InterceptError, ReplayError};
pub use interceptor::{InterceptionBackend, LiveBackend, RecordedBackend};
pub use replay::{replay, ReplayOutcome};
