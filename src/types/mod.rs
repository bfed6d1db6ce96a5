// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration, workload and result types.

pub mod config;
pub mod id;
pub mod result;
pub mod workload;

pub use config::{CageConfig, IsolationFlags, ResourceLimits};
pub use id::CageId;
pub use result::{compute_execution_hash, ExecutionResult, ExecutionSummary};
pub use workload::Workload;
