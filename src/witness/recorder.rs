// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Witness Recorder
//!
//! Appends hash-chained entries, streams them to a [`WitnessSink`] and
//! seals the log with its Merkle root.
//!
//! # Lifecycle
//! - `record_*` while open: each call assigns the next sequence number
//! - `seal()` once: computes the root, writes it, closes the log
//! - `abort()` instead of `seal()`: marks the log truncated; it never gets
//!   a root and can never verify
//!
//! Batching only controls when the sink flushes. The root depends on the
//! entries alone.

use super::entry::{OperationKind, WitnessEntry};
use super::log::WitnessLog;
use super::payload::{self, *};
use crate::config::{DEFAULT_MAX_WITNESS_BYTES, RECORDER_BATCH_SIZE};
use crate::drg::Draw;
use crate::error::{KernelResult, RecorderError};
use crate::hash::Hash;
use crate::merkle::{MerkleProof, MerkleTree};
use crate::policy::{DenyAction, OperationId, SyscallPolicy};
use std::io;

/// Destination for recorded entries.
pub trait WitnessSink {
    fn append(&mut self, entry: &WitnessEntry) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// Write the final entry count and root. Called exactly once.
    fn seal(&mut self, entry_count: u64, root: &Hash) -> io::Result<()>;
    fn mark_truncated(&mut self) -> io::Result<()>;
}

impl<S: WitnessSink + ?Sized> WitnessSink for Box<S> {
    fn append(&mut self, entry: &WitnessEntry) -> io::Result<()> {
        (**self).append(entry)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn seal(&mut self, entry_count: u64, root: &Hash) -> io::Result<()> {
        (**self).seal(entry_count, root)
    }

    fn mark_truncated(&mut self) -> io::Result<()> {
        (**self).mark_truncated()
    }
}

/// In-memory sink. Used for replays, which must not touch the original
/// witness file, and in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub entries: Vec<WitnessEntry>,
    pub root: Option<Hash>,
    pub truncated: bool,
    pub flushes: usize,
}

impl WitnessSink for MemorySink {
    fn append(&mut self, entry: &WitnessEntry) -> io::Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn seal(&mut self, _entry_count: u64, root: &Hash) -> io::Result<()> {
        self.root = Some(*root);
        Ok(())
    }

    fn mark_truncated(&mut self) -> io::Result<()> {
        self.truncated = true;
        Ok(())
    }
}

pub struct WitnessRecorder<S: WitnessSink> {
    log: WitnessLog,
    sink: S,
    retain_inputs: bool,
    workers: usize,
    batch_size: usize,
    pending: usize,
    size_bytes: u64,
    max_bytes: u64,
}

impl<S: WitnessSink> WitnessRecorder<S> {
    pub fn new(sink: S, retain_inputs: bool, workers: usize) -> Self {
        Self {
            log: WitnessLog::new(),
            sink,
            retain_inputs,
            workers: workers.max(1),
            batch_size: RECORDER_BATCH_SIZE,
            pending: 0,
            size_bytes: 0,
            max_bytes: DEFAULT_MAX_WITNESS_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Encoded size of the entries recorded so far.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn log(&self) -> &WitnessLog {
        &self.log
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Record an operation by its payload hash only.
    pub fn record(&mut self, kind: OperationKind, label: &str, payload: &[u8]) -> Result<u64, RecorderError> {
        self.append(kind, label, payload, false)
    }

    /// Record a replayable input, keeping the raw bytes when configured to.
    pub fn record_input(&mut self, kind: OperationKind, label: &str, payload: &[u8]) -> Result<u64, RecorderError> {
        let retain = self.retain_inputs && kind.is_replayable_input();
        self.append(kind, label, payload, retain)
    }

    pub fn record_policy(&mut self, policy: &SyscallPolicy) -> Result<u64, RecorderError> {
        let bytes = payload::encode(&FilterPayload {
            policy_digest: policy.digest(),
            deny_action: policy.deny_action,
            denied: policy.denied.iter().copied().collect(),
        })?;
        self.append(OperationKind::SyscallResult, LABEL_POLICY, &bytes, self.retain_inputs)
    }

    pub fn record_environment(&mut self, key: &str, value: &str) -> Result<u64, RecorderError> {
        let bytes = payload::encode(&EnvironmentPayload {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        self.record_input(OperationKind::EnvironmentRead, key, &bytes)
    }

    pub fn record_invocation(&mut self, program: &str, args: &[String]) -> Result<u64, RecorderError> {
        let bytes = payload::encode(&InvocationPayload {
            program: program.to_string(),
            args: args.to_vec(),
        })?;
        self.append(OperationKind::SyscallResult, LABEL_EXECVE, &bytes, self.retain_inputs)
    }

    /// The draw's bytes never enter the log, only its position and hash.
    pub fn record_randomness(&mut self, draw: &Draw) -> Result<u64, RecorderError> {
        let bytes = payload::encode(&EntropyPayload {
            counter: draw.counter,
            blocks: draw.blocks,
            len: draw.bytes.len() as u64,
            output_hash: draw.output_hash(),
        })?;
        self.append(OperationKind::RandomnessInjection, LABEL_ENTROPY, &bytes, true)
    }

    pub fn record_exit(&mut self, code: i32, signal: Option<i32>) -> Result<u64, RecorderError> {
        let bytes = payload::encode(&ExitPayload { code, signal })?;
        self.append(OperationKind::SyscallResult, LABEL_EXIT, &bytes, true)
    }

    /// A call the policy denied, with the action that answered it.
    pub fn record_violation(
        &mut self,
        operation: OperationId,
        call: &str,
        deny_action: DenyAction,
    ) -> Result<u64, RecorderError> {
        let bytes = payload::encode(&ViolationPayload {
            operation,
            call: call.to_string(),
            deny_action,
        })?;
        self.append(OperationKind::PolicyViolation, LABEL_VIOLATION, &bytes, true)
    }

    pub fn record_entropy_device(&mut self, path: &str) -> Result<u64, RecorderError> {
        let bytes = payload::encode(&EntropyDevicePayload {
            path: path.to_string(),
        })?;
        self.append(OperationKind::SyscallResult, LABEL_ENTROPY_DEVICE, &bytes, true)
    }

    fn append(&mut self, kind: OperationKind, label: &str, payload: &[u8], retain: bool) -> Result<u64, RecorderError> {
        self.check_open()?;

        let seq = self.log.len() as u64;
        let entry = WitnessEntry::new(seq, kind, label, payload, retain, &self.log.last_entry_hash());
        let size = self.size_bytes + payload::encode(&entry)?.len() as u64;
        if size > self.max_bytes {
            return Err(RecorderError::WitnessTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        self.sink.append(&entry)?;
        self.size_bytes = size;
        self.log.push(entry);

        self.pending += 1;
        if self.pending >= self.batch_size {
            self.sink.flush()?;
            self.pending = 0;
        }
        Ok(seq)
    }

    fn check_open(&self) -> Result<(), RecorderError> {
        if self.log.is_sealed() {
            return Err(RecorderError::Sealed);
        }
        if self.log.is_truncated() {
            return Err(RecorderError::Truncated);
        }
        Ok(())
    }

    /// Close the log and return its Merkle root.
    pub fn seal(&mut self) -> Result<Hash, RecorderError> {
        self.check_open()?;

        let root = MerkleTree::build(&self.log.entry_hashes(), self.workers).root();
        self.sink.flush()?;
        self.sink.seal(self.log.len() as u64, &root)?;
        self.pending = 0;
        self.log.seal(root);
        Ok(root)
    }

    /// Mark the partial log truncated and push it to the sink.
    pub fn abort(&mut self) -> Result<(), RecorderError> {
        if self.log.is_sealed() || self.log.is_truncated() {
            return Ok(());
        }
        self.log.mark_truncated();
        self.sink.flush()?;
        self.sink.mark_truncated()?;
        Ok(())
    }

    pub fn generate_proof(&self, sequence_number: u64) -> KernelResult<MerkleProof> {
        self.log.generate_proof(sequence_number, self.workers)
    }

    pub fn into_parts(self) -> (WitnessLog, S) {
        (self.log, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_appends_after_seal() {
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record(OperationKind::FileWrite, "stdout", b"hello").unwrap();
        rec.seal().unwrap();

        assert!(matches!(
            rec.record(OperationKind::FileWrite, "stdout", b"late"),
            Err(RecorderError::Sealed)
        ));
        assert!(matches!(rec.seal(), Err(RecorderError::Sealed)));
    }

    #[test]
    fn test_abort_marks_truncated_without_root() {
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record(OperationKind::FileRead, "stdin", b"x").unwrap();
        rec.abort().unwrap();

        let (log, sink) = rec.into_parts();
        assert!(log.is_truncated());
        assert!(log.merkle_root().is_none());
        assert!(sink.truncated);
        assert!(sink.root.is_none());
    }

    #[test]
    fn test_inputs_retained_outputs_not() {
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record_input(OperationKind::FileRead, "stdin", b"in").unwrap();
        rec.record_input(OperationKind::FileWrite, "stdout", b"out").unwrap();

        let entries = rec.log().entries();
        assert_eq!(entries[0].payload.as_deref(), Some(&b"in"[..]));
        assert!(entries[1].payload.is_none());
    }

    #[test]
    fn test_batches_flush() {
        let mut rec = WitnessRecorder::new(MemorySink::default(), false, 1).with_batch_size(2);
        for i in 0..5u8 {
            rec.record(OperationKind::SyscallResult, "op", &[i]).unwrap();
        }
        assert_eq!(rec.sink().flushes, 2);
        assert_eq!(rec.sink().entries.len(), 5);
    }

    #[test]
    fn test_size_ceiling_is_fatal_for_the_entry() {
        let mut rec = WitnessRecorder::new(MemorySink::default(), false, 1).with_max_bytes(400);
        rec.record(OperationKind::FileWrite, "stdout", b"a").unwrap();
        let one = rec.size_bytes();
        assert!(one > 0 && one < 400);

        let mut err = None;
        for i in 0..100u8 {
            if let Err(e) = rec.record(OperationKind::FileWrite, "stdout", &[i]) {
                err = Some(e);
                break;
            }
        }
        match err {
            Some(RecorderError::WitnessTooLarge { size, limit }) => {
                assert_eq!(limit, 400);
                assert!(size > 400);
            }
            other => panic!("expected WitnessTooLarge, got {other:?}"),
        }
        assert!(rec.size_bytes() <= 400);
        assert_eq!(rec.sink().entries.len(), rec.len());
    }

    #[test]
    fn test_violation_entries_are_retained() {
        let mut rec = WitnessRecorder::new(MemorySink::default(), false, 1);
        let seq = rec
            .record_violation(OperationId::WallClockRead, "clock_gettime", DenyAction::ReturnError)
            .unwrap();
        let entry = &rec.log().entries()[seq as usize];
        assert_eq!(entry.operation_kind, OperationKind::PolicyViolation);
        assert_eq!(entry.label, LABEL_VIOLATION);
        let decoded: ViolationPayload = payload::decode(entry.payload.as_deref().unwrap()).unwrap();
        assert_eq!(decoded.call, "clock_gettime");
        assert_eq!(decoded.operation, OperationId::WallClockRead);
    }
}
