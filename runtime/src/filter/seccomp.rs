// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! seccomp-BPF backend.
//!
//! Compiles in the parent, applies in the child. Applying sets
//! `PR_SET_NO_NEW_PRIVS` and loads the program; the kernel keeps the filter
//! across `execve` and only ever lets a process add stricter ones.
//!
//! Every matched call returns `SECCOMP_RET_TRACE`, which stops the workload
//! and wakes the supervising parent. A filter loaded without a tracer
//! attached fails those calls with `ENOSYS`, so it never lets one through.
//!
//! Kernel 4.8+ is needed for the filter to be rechecked after the tracer
//! rewrites a call.

use super::syscalls::{denied_calls, memory_syscalls, open_syscalls};
use super::{CompiledFilter, SyscallPolicyBackend, TraceRules, Watch};
use crate::errors::FilterError;
use cage_kernel::policy::{OperationId, SyscallPolicy};
use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use std::collections::{BTreeMap, BTreeSet};
use std::io;

pub struct SeccompBackend;

fn target_arch() -> Result<TargetArch, FilterError> {
    if !cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
        return Err(FilterError::UnsupportedArch(std::env::consts::ARCH.to_string()));
    }
    std::env::consts::ARCH
        .try_into()
        .map_err(|_| FilterError::UnsupportedArch(std::env::consts::ARCH.to_string()))
}

/// Supervisor rules for a policy: what is denied, what is watched.
pub fn trace_rules(policy: &SyscallPolicy, watch: Watch) -> TraceRules {
    let denies = |op| policy.denied.contains(&op);
    TraceRules {
        deny_action: policy.deny_action,
        denied: denied_calls(&policy.denied),
        opens: if denies(OperationId::KernelEntropy) {
            open_syscalls()
        } else {
            BTreeSet::new()
        },
        memory: if watch.memory { memory_syscalls() } else { BTreeSet::new() },
        hide_vdso: denies(OperationId::WallClockRead) || denies(OperationId::HardwareCounter),
        trap_tsc: cfg!(target_arch = "x86_64") && denies(OperationId::HardwareCounter),
    }
}

impl SyscallPolicyBackend for SeccompBackend {
    fn name(&self) -> &'static str {
        "seccomp"
    }

    fn compile(&self, policy: &SyscallPolicy, watch: Watch) -> Result<CompiledFilter, FilterError> {
        let rules = trace_rules(policy, watch);
        let count = rules.denied.len();

        if rules.is_empty() {
            tracing::debug!("Empty policy; workload runs without a syscall filter");
            return Ok(CompiledFilter::new(|| Ok(()), policy, 0, self.name()).with_rules(rules));
        }

        // Empty rule list: match the syscall unconditionally.
        let traced: BTreeMap<i64, Vec<SeccompRule>> = rules
            .denied
            .keys()
            .chain(&rules.opens)
            .chain(&rules.memory)
            .map(|nr| (*nr, vec![]))
            .collect();

        let filter = SeccompFilter::new(traced, SeccompAction::Allow, SeccompAction::Trace(0), target_arch()?)
            .map_err(|e| FilterError::Build(e.to_string()))?;

        let program: BpfProgram = filter
            .try_into()
            .map_err(|e: seccompiler::BackendError| FilterError::Build(e.to_string()))?;

        tracing::debug!(
            "Compiled seccomp filter: {} denied, {} watched, {} instructions, action {:?}",
            count,
            rules.opens.len() + rules.memory.len(),
            program.len(),
            policy.deny_action
        );

        let apply = move || {
            seccompiler::apply_filter(&program)
                .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))
        };
        Ok(CompiledFilter::new(apply, policy, count, self.name()).with_rules(rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_kernel::policy::{default_denied, DenyAction};

    #[test]
    fn test_compiles_default_policy() {
        let policy = SyscallPolicy::new(default_denied(), DenyAction::TerminateProcess);
        let filter = SeccompBackend.compile(&policy, Watch::default()).unwrap();
        assert_eq!(filter.backend, "seccomp");
        assert_eq!(filter.policy_digest, policy.digest());
        assert!(filter.denied_syscalls >= 3);
        assert_eq!(filter.rules.deny_action, DenyAction::TerminateProcess);
        assert!(filter.rules.hide_vdso);
        assert!(!filter.rules.opens.is_empty());
        assert!(filter.rules.memory.is_empty());
        assert_eq!(filter.rules.trap_tsc, cfg!(target_arch = "x86_64"));
    }

    #[test]
    fn test_empty_policy_is_a_noop() {
        let policy = SyscallPolicy::new(BTreeSet::new(), DenyAction::ReturnError);
        let filter = SeccompBackend.compile(&policy, Watch::default()).unwrap();
        assert_eq!(filter.denied_syscalls, 0);
        assert!(filter.rules.is_empty());
        assert!(!filter.rules.hide_vdso);
    }

    #[test]
    fn test_isolation_classes_add_syscalls() {
        let base = SyscallPolicy::new(default_denied(), DenyAction::ReturnError);
        let mut denied = default_denied();
        denied.insert(OperationId::NetworkAccess);
        let isolated = SyscallPolicy::new(denied, DenyAction::ReturnError);

        let a = SeccompBackend.compile(&base, Watch::default()).unwrap();
        let b = SeccompBackend.compile(&isolated, Watch::default()).unwrap();
        assert!(b.denied_syscalls > a.denied_syscalls);
        assert_ne!(a.policy_digest, b.policy_digest);
    }

    #[test]
    fn test_memory_watch_without_denials() {
        let policy = SyscallPolicy::new(BTreeSet::new(), DenyAction::ReturnError);
        let filter = SeccompBackend.compile(&policy, Watch { memory: true }).unwrap();
        assert_eq!(filter.denied_syscalls, 0);
        assert!(filter.rules.memory.contains(&i64::from(libc::SYS_mmap)));
        assert!(!filter.rules.is_empty());
    }
}
