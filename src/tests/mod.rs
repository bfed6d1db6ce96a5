// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod merkle_tests;
pub mod witness_tests;
pub mod tamper_tests;
pub mod determinism_tests;

use crate::drg::DeterministicRandomState;
use crate::policy::{default_denied, DenyAction, SyscallPolicy};
use crate::witness::{MemorySink, OperationKind, WitnessLog, WitnessRecorder};

/// A sealed log with the same entry layout the cage produces.
pub(crate) fn sample_log(seed: [u8; 32], stdout: &[u8]) -> WitnessLog {
    let mut rec = WitnessRecorder::new(MemorySink::default(), true, 2);
    let policy = SyscallPolicy::new(default_denied(), DenyAction::TerminateProcess);
    let mut drg = DeterministicRandomState::new(seed);

    rec.record_policy(&policy).unwrap();
    rec.record_environment("LC_ALL", "C").unwrap();
    rec.record_environment("TZ", "UTC").unwrap();
    rec.record_invocation("/bin/echo", &["hello".to_string()]).unwrap();
    rec.record_input(OperationKind::FileRead, "stdin", b"").unwrap();
    rec.record_randomness(&drg.next_bytes(96)).unwrap();
    rec.record(OperationKind::FileWrite, "stdout", stdout).unwrap();
    rec.record(OperationKind::FileWrite, "stderr", b"").unwrap();
    rec.record_exit(0, None).unwrap();
    rec.seal().unwrap();

    rec.into_parts().0
}
