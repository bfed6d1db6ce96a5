// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Interception Backends
//!
//! Everything the workload receives from outside passes through one
//! [`InterceptionBackend`]: environment, invocation, stdin and entropy.
//!
//! - [`LiveBackend`]: takes them from the caller and the DRG
//! - [`RecordedBackend`]: takes them from a verified witness log, re-deriving
//!   entropy from the seed and checking every draw against its record

use crate::errors::InterceptError;
use cage_kernel::config::MAX_ENTROPY_BYTES;
use cage_kernel::drg::{blocks_for, DeterministicRandomState, Draw};
use cage_kernel::replay::ReplayArena;
use cage_kernel::types::{CageConfig, Workload};
use cage_kernel::witness::WitnessLog;
use std::collections::BTreeMap;

pub const ENV_DETERMINISTIC: &str = "CAGE_DETERMINISTIC";
pub const ENV_RANDOM: &str = "CAGE_RANDOM";
pub const ENV_ENTROPY_BYTES: &str = "CAGE_ENTROPY_BYTES";
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Inputs of one execution, in the order they are recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInputs {
    pub environment: BTreeMap<String, String>,
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Vec<u8>,
    pub entropy: Vec<Draw>,
}

impl PreparedInputs {
    /// Concatenated entropy pool offered on the entropy descriptor.
    pub fn entropy_pool(&self) -> Vec<u8> {
        self.entropy.iter().flat_map(|d| d.bytes.iter().copied()).collect()
    }
}

pub trait InterceptionBackend {
    fn name(&self) -> &'static str;

    fn prepare(
        &mut self,
        workload: &Workload,
        drg: Option<&mut DeterministicRandomState>,
    ) -> Result<PreparedInputs, InterceptError>;
}

/// The environment a live workload sees: TZ, locale and PATH pinned,
/// then the configured variables, then the cage's own markers.
pub fn cage_environment(config: &CageConfig, entropy_len: usize) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("TZ".to_string(), "UTC".to_string());
    env.insert("LC_ALL".to_string(), "C".to_string());
    env.insert("PATH".to_string(), DEFAULT_PATH.to_string());
    env.extend(config.environment.clone());
    env.insert(ENV_DETERMINISTIC.to_string(), "1".to_string());
    env.insert(ENV_RANDOM.to_string(), format!("/dev/fd/{}", crate::process::ENTROPY_FD));
    env.insert(ENV_ENTROPY_BYTES.to_string(), entropy_len.to_string());
    env
}

pub struct LiveBackend {
    config: CageConfig,
}

impl LiveBackend {
    pub fn new(config: &CageConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl InterceptionBackend for LiveBackend {
    fn name(&self) -> &'static str {
        "live"
    }

    fn prepare(
        &mut self,
        workload: &Workload,
        drg: Option<&mut DeterministicRandomState>,
    ) -> Result<PreparedInputs, InterceptError> {
        // No seed, no entropy: nothing else may stand in for the DRG.
        let entropy = match drg {
            Some(drg) => vec![drg.next_bytes(self.config.entropy_bytes)],
            None => Vec::new(),
        };
        let entropy_len = entropy.iter().map(|d| d.bytes.len()).sum();

        Ok(PreparedInputs {
            environment: cage_environment(&self.config, entropy_len),
            program: workload.program.clone(),
            args: workload.args.clone(),
            stdin: workload.stdin.clone(),
            entropy,
        })
    }
}

/// Serves the inputs of a recorded run. The workload passed to `prepare`
/// is ignored; the log is the only source.
pub struct RecordedBackend {
    arena: ReplayArena,
}

impl RecordedBackend {
    pub fn new(log: &WitnessLog) -> Self {
        Self {
            arena: ReplayArena::new(log),
        }
    }

    pub fn arena(&self) -> &ReplayArena {
        &self.arena
    }
}

impl InterceptionBackend for RecordedBackend {
    fn name(&self) -> &'static str {
        "recorded"
    }

    fn prepare(
        &mut self,
        _workload: &Workload,
        mut drg: Option<&mut DeterministicRandomState>,
    ) -> Result<PreparedInputs, InterceptError> {
        let invocation = self.arena.invocation()?;
        let records = self.arena.entropy_draws()?;

        let mut entropy = Vec::with_capacity(records.len());
        for (sequence_number, record) in &records {
            // The log is verified but not trusted to size allocations.
            let len = usize::try_from(record.len).unwrap_or(usize::MAX);
            if len > MAX_ENTROPY_BYTES || record.blocks != blocks_for(len) {
                return Err(InterceptError::EntropyOutOfBounds {
                    sequence_number: *sequence_number,
                    len: record.len,
                    blocks: record.blocks,
                });
            }
            let drg = drg.as_deref_mut().ok_or(InterceptError::MissingSeed)?;
            if drg.sequence_counter() != record.counter {
                return Err(InterceptError::CounterMismatch {
                    recorded: record.counter,
                    current: drg.sequence_counter(),
                });
            }
            let draw = drg.next_bytes(len);
            if draw.output_hash() != record.output_hash {
                return Err(InterceptError::EntropyMismatch {
                    sequence_number: *sequence_number,
                    expected: record.output_hash,
                    actual: draw.output_hash(),
                });
            }
            entropy.push(draw);
        }

        Ok(PreparedInputs {
            environment: self.arena.environment()?,
            program: invocation.program,
            args: invocation.args,
            stdin: self.arena.stdin()?,
            entropy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_kernel::witness::payload::{self, EntropyPayload};
    use cage_kernel::witness::{MemorySink, OperationKind, WitnessEntry, WitnessRecorder};

    fn seed() -> [u8; 32] {
        [0u8; 32]
    }

    fn record(config: &CageConfig, inputs: &PreparedInputs) -> WitnessLog {
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record_policy(&config.effective_policy()).unwrap();
        for (k, v) in &inputs.environment {
            rec.record_environment(k, v).unwrap();
        }
        rec.record_invocation(&inputs.program, &inputs.args).unwrap();
        rec.record_input(OperationKind::FileRead, "stdin", &inputs.stdin).unwrap();
        for draw in &inputs.entropy {
            rec.record_randomness(draw).unwrap();
        }
        rec.record_exit(0, None).unwrap();
        rec.seal().unwrap();
        rec.into_parts().0
    }

    #[test]
    fn test_live_environment_is_pinned() {
        let config = CageConfig::recording(seed(), "w.log").with_env("TZ", "Europe/Paris");
        let env = cage_environment(&config, 96);
        assert_eq!(env["TZ"], "Europe/Paris");
        assert_eq!(env["LC_ALL"], "C");
        assert_eq!(env[ENV_DETERMINISTIC], "1");
        assert_eq!(env[ENV_RANDOM], "/dev/fd/3");
        assert_eq!(env[ENV_ENTROPY_BYTES], "96");
    }

    #[test]
    fn test_recorded_matches_live() {
        let config = CageConfig::recording(seed(), "w.log").with_env("LC_ALL", "C");
        let workload = Workload::new("/bin/echo").arg("hello").stdin(b"in".to_vec());

        let mut drg = DeterministicRandomState::new(seed());
        let live = LiveBackend::new(&config).prepare(&workload, Some(&mut drg)).unwrap();
        let log = record(&config, &live);

        let mut drg = DeterministicRandomState::new(seed());
        let replayed = RecordedBackend::new(&log)
            .prepare(&Workload::new("ignored"), Some(&mut drg))
            .unwrap();
        assert_eq!(replayed, live);
    }

    #[test]
    fn test_wrong_seed_detected() {
        let config = CageConfig::recording(seed(), "w.log");
        let mut drg = DeterministicRandomState::new(seed());
        let live = LiveBackend::new(&config)
            .prepare(&Workload::new("/bin/true"), Some(&mut drg))
            .unwrap();
        let log = record(&config, &live);

        let mut other = DeterministicRandomState::new([9u8; 32]);
        let err = RecordedBackend::new(&log)
            .prepare(&Workload::new("/bin/true"), Some(&mut other))
            .unwrap_err();
        assert!(matches!(err, InterceptError::EntropyMismatch { .. }));

        let err = RecordedBackend::new(&log)
            .prepare(&Workload::new("/bin/true"), None)
            .unwrap_err();
        assert!(matches!(err, InterceptError::MissingSeed));
    }

    fn log_with_draw(draw: EntropyPayload) -> WitnessLog {
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record_invocation("/bin/true", &[]).unwrap();
        rec.record_input(OperationKind::FileRead, "stdin", b"").unwrap();
        let (log, _) = rec.into_parts();

        let mut entries = log.entries().to_vec();
        let bytes = payload::encode(&draw).unwrap();
        entries.push(WitnessEntry::new(
            2,
            OperationKind::RandomnessInjection,
            payload::LABEL_ENTROPY,
            &bytes,
            true,
            &log.last_entry_hash(),
        ));
        WitnessLog::from_parts(entries, None, false)
    }

    #[test]
    fn test_oversized_entropy_record_rejected() {
        let huge = EntropyPayload {
            counter: 0,
            blocks: 1 << 40,
            len: 1 << 46,
            output_hash: [0u8; 32],
        };
        let mut drg = DeterministicRandomState::new(seed());
        let err = RecordedBackend::new(&log_with_draw(huge))
            .prepare(&Workload::new("/bin/true"), Some(&mut drg))
            .unwrap_err();
        assert!(matches!(
            err,
            InterceptError::EntropyOutOfBounds { sequence_number: 2, len, .. } if len == 1 << 46
        ));
        assert_eq!(drg.sequence_counter(), 0);

        let skewed = EntropyPayload {
            counter: 0,
            blocks: 7,
            len: 64,
            output_hash: [0u8; 32],
        };
        let mut drg = DeterministicRandomState::new(seed());
        let err = RecordedBackend::new(&log_with_draw(skewed))
            .prepare(&Workload::new("/bin/true"), Some(&mut drg))
            .unwrap_err();
        assert!(matches!(err, InterceptError::EntropyOutOfBounds { blocks: 7, .. }));
    }
}
