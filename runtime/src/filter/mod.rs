// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Syscall Policy Filter
//!
//! A backend turns a [`SyscallPolicy`] into a [`CompiledFilter`]: a program
//! built in the parent and armed in the child between `fork` and `exec`.
//! Nothing the workload runs is ever unfiltered, and the kernel only lets a
//! filter narrow, so the workload cannot widen its own permissions.
//!
//! The filter does not answer denied calls itself. It hands them to the
//! supervising parent together with the [`TraceRules`] needed to record
//! each one and then refuse it or kill the workload.
//!
//! # Backends
//! - `seccomp`: seccomp-BPF on Linux
//! - `stub`: every other platform; refuses to compile any policy

pub mod stub;
#[cfg(target_os = "linux")]
pub mod seccomp;
#[cfg(target_os = "linux")]
pub mod syscalls;

use crate::errors::{CageError, FilterError};
use cage_kernel::policy::{DenyAction, OperationId, SyscallPolicy};
use cage_kernel::types::CageConfig;
use cage_kernel::Hash;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

/// Extra calls to route through the supervisor besides the denied ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watch {
    /// Address-space growth, so refusals under the memory cap are seen.
    pub memory: bool,
}

impl Watch {
    pub fn for_config(config: &CageConfig) -> Self {
        Self {
            memory: config.resource_limits.max_memory_bytes.is_some(),
        }
    }
}

/// A denied syscall: the class it belongs to and its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeniedCall {
    pub operation: OperationId,
    pub name: &'static str,
}

/// What the supervisor does with the calls the filter hands it.
#[derive(Debug, Clone, Default)]
pub struct TraceRules {
    pub deny_action: DenyAction,
    /// Denied syscall numbers.
    pub denied: BTreeMap<i64, DeniedCall>,
    /// `open` family; opens of kernel entropy devices are redirected to the
    /// DRG pool.
    pub opens: BTreeSet<i64>,
    /// `mmap`, `mremap`, `brk`.
    pub memory: BTreeSet<i64>,
    /// Strip the vDSO from every new image so clock reads enter the kernel.
    pub hide_vdso: bool,
    /// Make `rdtsc` fault so the supervisor can answer it.
    pub trap_tsc: bool,
}

impl TraceRules {
    /// Nothing to route through the supervisor.
    pub fn is_empty(&self) -> bool {
        self.denied.is_empty() && self.opens.is_empty() && self.memory.is_empty()
    }
}

/// One call the supervisor stopped the workload for, reported while the
/// workload is still stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    Denied(DeniedCall),
    EntropyDevice { path: String },
}

/// Receives each interception while the workload is stopped. Returns the
/// witness sequence number it was recorded under, if any.
pub type InterceptFn<'a> = dyn FnMut(&Interception) -> Result<Option<u64>, CageError> + 'a;

/// A denied call answered by killing the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub call: DeniedCall,
    pub sequence_number: Option<u64>,
}

type ApplyFn = dyn Fn() -> io::Result<()> + Send + Sync;

/// A filter ready to be armed in the child.
///
/// `apply` runs after `fork`: it must not allocate or take locks.
#[derive(Clone)]
pub struct CompiledFilter {
    apply: Arc<ApplyFn>,
    pub policy_digest: Hash,
    pub denied_syscalls: usize,
    pub backend: &'static str,
    pub rules: TraceRules,
}

impl CompiledFilter {
    pub fn new<F>(apply: F, policy: &SyscallPolicy, denied_syscalls: usize, backend: &'static str) -> Self
    where
        F: Fn() -> io::Result<()> + Send + Sync + 'static,
    {
        Self {
            apply: Arc::new(apply),
            policy_digest: policy.digest(),
            denied_syscalls,
            backend,
            rules: TraceRules {
                deny_action: policy.deny_action,
                ..TraceRules::default()
            },
        }
    }

    pub fn with_rules(mut self, rules: TraceRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn apply(&self) -> io::Result<()> {
        (self.apply)()
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("backend", &self.backend)
            .field("denied_syscalls", &self.denied_syscalls)
            .finish()
    }
}

pub trait SyscallPolicyBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn compile(&self, policy: &SyscallPolicy, watch: Watch) -> Result<CompiledFilter, FilterError>;
}

/// Compile the effective policy of `config` on `backend`. The result is
/// armed in the child by [`CompiledFilter::apply`].
pub fn install(backend: &dyn SyscallPolicyBackend, config: &CageConfig) -> Result<CompiledFilter, FilterError> {
    backend.compile(&config.effective_policy(), Watch::for_config(config))
}

#[cfg(target_os = "linux")]
pub fn default_backend() -> Box<dyn SyscallPolicyBackend> {
    Box::new(seccomp::SeccompBackend)
}

#[cfg(not(target_os = "linux"))]
pub fn default_backend() -> Box<dyn SyscallPolicyBackend> {
    Box::new(stub::StubBackend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_uses_the_effective_policy() {
        let mut config = CageConfig::recording([0u8; 32], "w.log");
        config.isolation_flags.network_isolated = true;
        config.resource_limits.max_memory_bytes = Some(64 << 20);

        let filter = install(default_backend().as_ref(), &config);
        if cfg!(target_os = "linux") {
            let filter = filter.unwrap();
            assert_eq!(filter.policy_digest, config.effective_policy().digest());
            assert!(filter
                .rules
                .denied
                .values()
                .any(|call| call.operation == OperationId::NetworkAccess));
            assert!(!filter.rules.memory.is_empty());
        } else {
            assert!(matches!(filter, Err(FilterError::Unsupported)));
        }
    }
}
