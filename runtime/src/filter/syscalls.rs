// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Operation classes mapped onto host syscall numbers.
//!
//! The tables name syscalls through `libc::SYS_*` so the same source covers
//! every architecture libc knows. Legacy entry points that only exist on
//! x86_64 are gated there.

use super::DeniedCall;
use cage_kernel::policy::OperationId;
use std::collections::{BTreeMap, BTreeSet};

/// `(number, name)` pairs, the name taken from the `SYS_` constant.
macro_rules! calls {
    ($($sys:ident),* $(,)?) => {
        vec![$((i64::from(libc::$sys), &stringify!($sys)[4..])),*]
    };
}

/// Syscalls that perform `op`, with their names. Empty for the safe
/// subset, which is never filtered.
pub fn calls_for(op: OperationId) -> Vec<(i64, &'static str)> {
    let mut calls = match op {
        OperationId::WallClockRead => calls![
            SYS_clock_gettime,
            SYS_gettimeofday,
            SYS_times,
            SYS_sysinfo,
            SYS_adjtimex,
            SYS_clock_adjtime,
        ],
        OperationId::HardwareCounter => calls![SYS_perf_event_open],
        OperationId::KernelEntropy => calls![SYS_getrandom],
        OperationId::ProcessIdentity => calls![SYS_getpid, SYS_getppid, SYS_gettid, SYS_getpgid, SYS_getsid],
        OperationId::UserIdentity => calls![
            SYS_getuid,
            SYS_geteuid,
            SYS_getgid,
            SYS_getegid,
            SYS_getresuid,
            SYS_getresgid,
            SYS_getgroups,
        ],
        OperationId::NetworkAccess => calls![SYS_socket, SYS_connect, SYS_bind, SYS_listen, SYS_accept, SYS_accept4],
        OperationId::FilesystemEscape => {
            calls![SYS_chroot, SYS_pivot_root, SYS_mount, SYS_umount2, SYS_unshare, SYS_setns]
        }
        OperationId::ProcessTracing => calls![SYS_ptrace, SYS_process_vm_readv, SYS_process_vm_writev],
        OperationId::MemoryManagement | OperationId::BasicIo | OperationId::ProcessLifecycle => {
            Vec::new()
        }
    };

    calls.extend(legacy_calls(op));
    calls.sort_unstable();
    calls
}

#[cfg(target_arch = "x86_64")]
fn legacy_calls(op: OperationId) -> Vec<(i64, &'static str)> {
    match op {
        OperationId::WallClockRead => calls![SYS_time],
        OperationId::ProcessIdentity => calls![SYS_getpgrp],
        _ => Vec::new(),
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn legacy_calls(_op: OperationId) -> Vec<(i64, &'static str)> {
    Vec::new()
}

pub fn syscalls_for(op: OperationId) -> Vec<i64> {
    calls_for(op).into_iter().map(|(nr, _)| nr).collect()
}

/// Every syscall denied by a set of operations, keyed by number.
pub fn denied_calls(denied: &BTreeSet<OperationId>) -> BTreeMap<i64, DeniedCall> {
    denied
        .iter()
        .flat_map(|op| {
            calls_for(*op)
                .into_iter()
                .map(move |(nr, name)| (nr, DeniedCall { operation: *op, name }))
        })
        .collect()
}

/// Every syscall denied by a set of operations, deduplicated and sorted.
pub fn denied_syscalls(denied: &BTreeSet<OperationId>) -> BTreeSet<i64> {
    denied_calls(denied).into_keys().collect()
}

/// Calls that open a path.
pub fn open_syscalls() -> BTreeSet<i64> {
    let mut nrs: BTreeSet<i64> = calls![SYS_openat, SYS_openat2].into_iter().map(|(nr, _)| nr).collect();
    #[cfg(target_arch = "x86_64")]
    nrs.insert(i64::from(libc::SYS_open));
    nrs
}

/// Calls that grow the address space.
pub fn memory_syscalls() -> BTreeSet<i64> {
    calls![SYS_mmap, SYS_mremap, SYS_brk].into_iter().map(|(nr, _)| nr).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_subset_maps_to_nothing() {
        for op in OperationId::ALL.iter().filter(|op| op.is_safe()) {
            assert!(syscalls_for(*op).is_empty(), "{op} must stay unfiltered");
        }
    }

    #[test]
    fn test_every_denyable_class_is_covered() {
        for op in OperationId::ALL.iter().filter(|op| !op.is_safe()) {
            assert!(!syscalls_for(*op).is_empty(), "{op} has no syscalls");
        }
    }

    #[test]
    fn test_classes_do_not_overlap() {
        let total: usize = OperationId::ALL.iter().map(|op| syscalls_for(*op).len()).sum();
        let all: BTreeSet<OperationId> = OperationId::ALL.into_iter().collect();
        assert_eq!(denied_syscalls(&all).len(), total);
    }

    #[test]
    fn test_clock_class_covers_every_time_source() {
        let calls = calls_for(OperationId::WallClockRead);
        for name in ["clock_gettime", "gettimeofday", "times", "sysinfo"] {
            assert!(calls.iter().any(|(_, n)| *n == name), "{name} missing");
        }
        assert!(calls.contains(&(i64::from(libc::SYS_clock_gettime), "clock_gettime")));
    }

    #[test]
    fn test_names_follow_numbers() {
        let denied = denied_calls(&[OperationId::NetworkAccess].into_iter().collect());
        let socket = denied[&i64::from(libc::SYS_socket)];
        assert_eq!(socket.name, "socket");
        assert_eq!(socket.operation, OperationId::NetworkAccess);
    }

    #[test]
    fn test_watched_calls_stay_out_of_denial_classes() {
        let all: BTreeSet<OperationId> = OperationId::ALL.into_iter().collect();
        let denied = denied_syscalls(&all);
        assert!(open_syscalls().is_disjoint(&denied));
        assert!(memory_syscalls().is_disjoint(&denied));
    }
}
