// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Fail-closed backend for platforms without a syscall filter.

use super::{CompiledFilter, SyscallPolicyBackend, Watch};
use crate::errors::FilterError;
use cage_kernel::policy::SyscallPolicy;

/// Refuses every policy. A cage without enforcement would record a witness
/// for guarantees it never had.
pub struct StubBackend;

impl SyscallPolicyBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn compile(&self, _policy: &SyscallPolicy, _watch: Watch) -> Result<CompiledFilter, FilterError> {
        tracing::error!("No syscall filter backend on this platform; refusing to run");
        Err(FilterError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_kernel::policy::{default_denied, DenyAction};

    #[test]
    fn test_stub_fails_closed() {
        let policy = SyscallPolicy::new(default_denied(), DenyAction::ReturnError);
        assert!(matches!(StubBackend.compile(&policy, Watch::default()), Err(FilterError::Unsupported)));
    }
}
