// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Syscall policy model.
//!
//! Operations are named by class, not by syscall number. The runtime maps
//! each class onto the syscalls of the host architecture; the kernel only
//! decides which classes are denied and how the decision is digested.

use crate::config::DOMAIN_POLICY;
use crate::hash::{CanonicalHasher, Hash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationId {
    WallClockRead,
    HardwareCounter,
    KernelEntropy,
    ProcessIdentity,
    UserIdentity,
    NetworkAccess,
    FilesystemEscape,
    ProcessTracing,
    MemoryManagement,
    BasicIo,
    ProcessLifecycle,
}

impl OperationId {
    pub const ALL: [OperationId; 11] = [
        OperationId::WallClockRead,
        OperationId::HardwareCounter,
        OperationId::KernelEntropy,
        OperationId::ProcessIdentity,
        OperationId::UserIdentity,
        OperationId::NetworkAccess,
        OperationId::FilesystemEscape,
        OperationId::ProcessTracing,
        OperationId::MemoryManagement,
        OperationId::BasicIo,
        OperationId::ProcessLifecycle,
    ];

    /// Stable tag used in digests. Never renumber.
    pub fn tag(self) -> u8 {
        match self {
            OperationId::WallClockRead => 1,
            OperationId::HardwareCounter => 2,
            OperationId::KernelEntropy => 3,
            OperationId::ProcessIdentity => 4,
            OperationId::UserIdentity => 5,
            OperationId::NetworkAccess => 6,
            OperationId::FilesystemEscape => 7,
            OperationId::ProcessTracing => 8,
            OperationId::MemoryManagement => 9,
            OperationId::BasicIo => 10,
            OperationId::ProcessLifecycle => 11,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationId::WallClockRead => "wall_clock_read",
            OperationId::HardwareCounter => "hardware_counter",
            OperationId::KernelEntropy => "kernel_entropy",
            OperationId::ProcessIdentity => "process_identity",
            OperationId::UserIdentity => "user_identity",
            OperationId::NetworkAccess => "network_access",
            OperationId::FilesystemEscape => "filesystem_escape",
            OperationId::ProcessTracing => "process_tracing",
            OperationId::MemoryManagement => "memory_management",
            OperationId::BasicIo => "basic_io",
            OperationId::ProcessLifecycle => "process_lifecycle",
        }
    }

    /// Operations no workload can run without. Denying them is a
    /// configuration error.
    pub fn is_safe(self) -> bool {
        matches!(
            self,
            OperationId::MemoryManagement | OperationId::BasicIo | OperationId::ProcessLifecycle
        )
    }

    /// Operations whose results depend on the host rather than the inputs.
    pub fn is_nondeterministic(self) -> bool {
        matches!(
            self,
            OperationId::WallClockRead
                | OperationId::HardwareCounter
                | OperationId::KernelEntropy
                | OperationId::ProcessIdentity
                | OperationId::UserIdentity
        )
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationId::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation {s:?}"))
    }
}

/// What the kernel does when a denied operation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyAction {
    TerminateProcess,
    /// The call fails with `EPERM`.
    #[default]
    ReturnError,
}

impl DenyAction {
    fn tag(self) -> u8 {
        match self {
            DenyAction::TerminateProcess => 1,
            DenyAction::ReturnError => 2,
        }
    }
}

/// Denied by default: clock, counters and kernel entropy.
pub fn default_denied() -> BTreeSet<OperationId> {
    [
        OperationId::WallClockRead,
        OperationId::HardwareCounter,
        OperationId::KernelEntropy,
    ]
    .into_iter()
    .collect()
}

/// The effective policy handed to a filter backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallPolicy {
    pub denied: BTreeSet<OperationId>,
    pub deny_action: DenyAction,
}

impl SyscallPolicy {
    pub fn new(denied: BTreeSet<OperationId>, deny_action: DenyAction) -> Self {
        Self { denied, deny_action }
    }

    pub fn is_denied(&self, op: OperationId) -> bool {
        self.denied.contains(&op)
    }

    /// Digest over the action and the denied set in canonical order.
    pub fn digest(&self) -> Hash {
        let mut h = CanonicalHasher::new(DOMAIN_POLICY);
        h.update_u8(self.deny_action.tag());
        h.update_u32(self.denied.len() as u32);
        for op in &self.denied {
            h.update_u8(op.tag());
        }
        h.finalize()
    }
}
