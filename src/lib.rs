// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! cage-kernel: the deterministic core of the determinism cage.
//!
//! Everything in this crate is a pure function of its inputs. Nothing here
//! reads the clock, the process table or the kernel entropy pool; those
//! concerns live in `cage-runtime`, which drives this crate.

pub mod config;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod drg;
pub mod policy;
pub mod types;
pub mod witness;
pub mod verify;
pub mod proof;
pub mod replay;

pub use error::{KernelError, KernelResult};
pub use hash::Hash;

#[cfg(test)]
pub mod tests;
