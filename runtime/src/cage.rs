// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Cage Orchestrator
//!
//! Runs one workload under one policy and records what it was given and
//! what it produced.
//!
//! # States
//! ```text
//! Configured -> FilterInstalled -> Recording -> Executing -> Sealed -> Completed
//!      \______________\________________\____________\_________\--> Aborted
//! ```
//! A cage executes once. After `Completed` or `Aborted` a new cage is
//! needed; nothing is retried in place.
//!
//! # Witness order
//! policy, environment (sorted by key), execve, stdin, entropy draws, then
//! one entry per denied call and per entropy-device open in the order the
//! workload made them, then stdout, stderr, exit. No pid and no wall-clock
//! reading is recorded.

use crate::errors::CageError;
use crate::filter::{self, CompiledFilter, InterceptFn, Interception, SyscallPolicyBackend};
use crate::interceptor::{InterceptionBackend, LiveBackend, PreparedInputs};
use crate::limits::{self, Termination};
use crate::process::{run_child, ChildOutcome, ChildSpec};
use cage_kernel::drg::DeterministicRandomState;
use cage_kernel::error::RecorderError;
use cage_kernel::types::{CageConfig, ExecutionResult, Workload};
use cage_kernel::witness::payload::{LABEL_STDERR, LABEL_STDIN, LABEL_STDOUT};
use cage_kernel::witness::{MemorySink, OperationKind, WitnessLog, WitnessRecorder, WitnessSink};
use cage_persistence::WitnessFileWriter;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CageState {
    Configured,
    FilterInstalled,
    Recording,
    Executing,
    Sealed,
    Completed,
    Aborted,
}

impl CageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CageState::Completed | CageState::Aborted)
    }
}

/// Point-in-time view of a cage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CageStats {
    pub state: CageState,
    /// Backend that compiled the filter, once one has.
    pub filter_backend: Option<&'static str>,
    pub denied_syscalls: usize,
    pub witness_entries: usize,
    /// Encoded size of the recorded entries.
    pub witness_bytes: u64,
    pub violations: u64,
    pub sealed: bool,
}

pub struct Cage<B: InterceptionBackend = LiveBackend> {
    config: CageConfig,
    state: CageState,
    backend: B,
    filter_backend: Box<dyn SyscallPolicyBackend>,
    witness: Option<WitnessLog>,
    filter: Option<(&'static str, usize)>,
    witness_bytes: u64,
    violations: u64,
}

impl Cage<LiveBackend> {
    pub fn new(config: CageConfig) -> Self {
        let backend = LiveBackend::new(&config);
        Cage::with_backend(config, backend)
    }
}

impl<B: InterceptionBackend> Cage<B> {
    pub fn with_backend(config: CageConfig, backend: B) -> Self {
        Self {
            config,
            state: CageState::Configured,
            backend,
            filter_backend: filter::default_backend(),
            witness: None,
            filter: None,
            witness_bytes: 0,
            violations: 0,
        }
    }

    /// Swap the syscall filter backend.
    pub fn with_filter_backend(mut self, filter_backend: Box<dyn SyscallPolicyBackend>) -> Self {
        self.filter_backend = filter_backend;
        self
    }

    pub fn state(&self) -> CageState {
        self.state
    }

    pub fn config(&self) -> &CageConfig {
        &self.config
    }

    /// Witness of the execution, sealed or truncated. `None` before
    /// execution or when recording is disabled.
    pub fn witness_log(&self) -> Option<&WitnessLog> {
        self.witness.as_ref()
    }

    pub fn stats(&self) -> CageStats {
        CageStats {
            state: self.state,
            filter_backend: self.filter.map(|(backend, _)| backend),
            denied_syscalls: self.filter.map_or(0, |(_, denied)| denied),
            witness_entries: self.witness.as_ref().map_or(0, |log| log.len()),
            witness_bytes: self.witness_bytes,
            violations: self.violations,
            sealed: self.witness.as_ref().is_some_and(|log| log.is_sealed()),
        }
    }

    /// Run the workload, streaming the witness to the configured path.
    pub fn execute(&mut self, workload: &Workload) -> Result<ExecutionResult, CageError> {
        if self.state != CageState::Configured {
            return Err(CageError::InvalidState(self.state));
        }
        if !self.config.enable_recording {
            return self.run(workload, None::<MemorySink>);
        }
        let writer = match WitnessFileWriter::create(&self.config.witness_output_path) {
            Ok(writer) => writer,
            Err(e) => {
                let err = CageError::from(e);
                self.abort(&err);
                return Err(err);
            }
        };
        self.run(workload, Some(writer))
    }

    /// Run the workload with an explicit sink; `None` disables recording.
    pub fn run<S: WitnessSink>(
        &mut self,
        workload: &Workload,
        sink: Option<S>,
    ) -> Result<ExecutionResult, CageError> {
        if self.state != CageState::Configured {
            return Err(CageError::InvalidState(self.state));
        }
        metrics::increment_counter!("cage_executions_total");
        let start = Instant::now();

        let mut recorder = sink.map(|s| {
            WitnessRecorder::new(s, self.config.retain_inputs, self.config.merkle_workers)
                .with_max_bytes(self.config.max_witness_bytes)
        });
        let result = self.drive(workload, &mut recorder);

        if let Err(err) = &result {
            if let Some(rec) = recorder.as_mut() {
                if let Err(e) = rec.abort() {
                    tracing::error!("Failed to mark witness log truncated: {}", e);
                }
            }
            self.abort(err);
        }
        self.witness_bytes = recorder.as_ref().map_or(0, |r| r.size_bytes());
        self.witness = recorder.map(|r| r.into_parts().0);

        metrics::histogram!("cage_execution_duration_seconds", start.elapsed().as_secs_f64());
        result
    }

    fn abort(&mut self, err: &CageError) {
        tracing::warn!("Cage aborted in state {:?}: {}", self.state, err);
        metrics::increment_counter!("cage_aborts_total", "reason" => err.category().as_str());
        self.state = CageState::Aborted;
    }

    fn transition(&mut self, next: CageState) {
        tracing::debug!("Cage {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn drive<S: WitnessSink>(
        &mut self,
        workload: &Workload,
        recorder: &mut Option<WitnessRecorder<S>>,
    ) -> Result<ExecutionResult, CageError> {
        self.config.validate()?;
        let policy = self.config.effective_policy();

        let compiled = filter::install(self.filter_backend.as_ref(), &self.config)?;
        self.filter = Some((compiled.backend, compiled.denied_syscalls));
        tracing::info!(
            "Filter compiled by {}: {} denied syscalls, action {:?}",
            compiled.backend,
            compiled.denied_syscalls,
            policy.deny_action
        );
        self.transition(CageState::FilterInstalled);

        record(recorder, |r| r.record_policy(&policy))?;
        self.transition(CageState::Recording);

        let mut drg = self.config.deterministic_seed.map(DeterministicRandomState::new);
        let inputs = self.backend.prepare(workload, drg.as_mut())?;
        record_inputs(recorder, &inputs)?;

        self.transition(CageState::Executing);
        let deny_action = policy.deny_action;
        let mut violations = 0u64;
        let mut on_intercept = |event: &Interception| -> Result<Option<u64>, CageError> {
            let seq = match event {
                Interception::Denied(call) => {
                    violations += 1;
                    metrics::increment_counter!(
                        "cage_policy_violations_total",
                        "operation" => call.operation.as_str()
                    );
                    record(recorder, |r| r.record_violation(call.operation, call.name, deny_action))?
                }
                Interception::EntropyDevice { path } => {
                    tracing::debug!("Serving {} from the DRG pool", path);
                    record(recorder, |r| r.record_entropy_device(path))?
                }
            };
            Ok(seq)
        };
        let spawned = self.spawn(&inputs, compiled, &mut on_intercept);
        self.violations = violations;
        let outcome = spawned?;

        let signal = outcome.exit.signal();
        if let Some(violation) = outcome.violation {
            return Err(CageError::PolicyViolation {
                operation: violation.call.operation,
                call: violation.call.name.to_string(),
                sequence_number: violation.sequence_number,
            });
        }

        let end = Termination {
            signal,
            exit_code: outcome.exit.code(),
            timed_out: outcome.timed_out,
            output_overflow: outcome.output_overflow,
            memory_refused: outcome.memory_refused,
        };
        if let Some(overrun) = limits::check(&self.config.resource_limits, &outcome.usage, &end) {
            return Err(CageError::ResourceExhausted {
                resource: overrun.resource,
                limit: overrun.limit,
                observed: overrun.observed,
            });
        }

        record(recorder, |r| r.record(OperationKind::FileWrite, LABEL_STDOUT, &outcome.stdout))?;
        record(recorder, |r| r.record(OperationKind::FileWrite, LABEL_STDERR, &outcome.stderr))?;
        record(recorder, |r| r.record_exit(outcome.exit.code(), signal))?;

        let root = match recorder.as_mut() {
            Some(rec) => {
                let root = rec.seal()?;
                tracing::info!(
                    "Witness sealed: {} entries, root {}",
                    rec.len(),
                    cage_kernel::hash::short_hex(&root)
                );
                self.transition(CageState::Sealed);
                Some(root)
            }
            None => None,
        };

        let ChildOutcome {
            exit,
            stdout,
            stderr,
            usage,
            ..
        } = outcome;
        let wall = std::time::Duration::from_millis(usage.wall_time_ms);
        let result = ExecutionResult::new(exit.code(), stdout, stderr, wall, root);
        self.transition(CageState::Completed);
        Ok(result)
    }

    fn spawn(
        &self,
        inputs: &PreparedInputs,
        filter: CompiledFilter,
        on_intercept: &mut InterceptFn<'_>,
    ) -> Result<ChildOutcome, CageError> {
        if let Some(dir) = &self.config.work_dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| CageError::Internal(format!("work dir {}: {e}", dir.display())))?;
        }
        run_child(
            ChildSpec {
                program: inputs.program.clone(),
                args: inputs.args.clone(),
                env: inputs.environment.clone(),
                stdin: inputs.stdin.clone(),
                entropy: inputs.entropy_pool(),
                work_dir: self.config.work_dir.clone(),
                limits: self.config.resource_limits,
                filter,
            },
            on_intercept,
        )
    }
}

/// Apply `f` when recording. Returns the sequence number it assigned.
fn record<S, F>(recorder: &mut Option<WitnessRecorder<S>>, f: F) -> Result<Option<u64>, RecorderError>
where
    S: WitnessSink,
    F: FnOnce(&mut WitnessRecorder<S>) -> Result<u64, RecorderError>,
{
    match recorder.as_mut() {
        Some(rec) => {
            let seq = f(rec)?;
            metrics::increment_counter!("cage_witness_entries_total");
            Ok(Some(seq))
        }
        None => Ok(None),
    }
}

fn record_inputs<S: WitnessSink>(
    recorder: &mut Option<WitnessRecorder<S>>,
    inputs: &PreparedInputs,
) -> Result<(), RecorderError> {
    for (key, value) in &inputs.environment {
        record(recorder, |r| r.record_environment(key, value))?;
    }
    record(recorder, |r| r.record_invocation(&inputs.program, &inputs.args))?;
    record(recorder, |r| r.record_input(OperationKind::FileRead, LABEL_STDIN, &inputs.stdin))?;
    for draw in &inputs.entropy {
        record(recorder, |r| r.record_randomness(draw))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FilterError;
    use crate::filter::stub::StubBackend;
    use crate::filter::Watch;
    use cage_kernel::error::{ConfigError, RecorderError};
    use cage_kernel::policy::SyscallPolicy;

    struct NoFilter;

    impl SyscallPolicyBackend for NoFilter {
        fn name(&self) -> &'static str {
            "none"
        }

        fn compile(&self, policy: &SyscallPolicy, _watch: Watch) -> Result<CompiledFilter, FilterError> {
            Ok(CompiledFilter::new(|| Ok(()), policy, 0, "none"))
        }
    }

    fn config() -> CageConfig {
        CageConfig::recording([0u8; 32], "unused.log")
    }

    #[test]
    fn test_invalid_config_aborts_before_spawn() {
        let mut cage = Cage::new(CageConfig::default()).with_filter_backend(Box::new(NoFilter));
        let err = cage
            .run(&Workload::new("/bin/true"), Some(MemorySink::default()))
            .unwrap_err();
        assert!(matches!(err, CageError::Config(ConfigError::MissingSeed)));
        assert_eq!(cage.state(), CageState::Aborted);
        assert!(cage.witness_log().unwrap().is_truncated());
    }

    #[test]
    fn test_filter_failure_is_fatal() {
        let mut cage = Cage::new(config()).with_filter_backend(Box::new(StubBackend));
        let err = cage
            .run(&Workload::new("/bin/true"), Some(MemorySink::default()))
            .unwrap_err();
        assert!(matches!(err, CageError::Filter(FilterError::Unsupported)));
        assert_eq!(cage.state(), CageState::Aborted);
        assert!(cage.witness_log().unwrap().is_empty());
    }

    #[test]
    fn test_spawn_failure_truncates_log() {
        let mut cage = Cage::new(config()).with_filter_backend(Box::new(NoFilter));
        let err = cage
            .run(&Workload::new("/nonexistent/cage-workload"), Some(MemorySink::default()))
            .unwrap_err();
        assert!(matches!(err, CageError::Spawn { .. }));
        let log = cage.witness_log().unwrap();
        assert!(log.is_truncated());
        assert!(!log.is_sealed());
        assert!(log.len() > 1);
    }

    #[test]
    fn test_cage_runs_once() {
        let mut cage = Cage::new(config()).with_filter_backend(Box::new(StubBackend));
        let _ = cage.run(&Workload::new("/bin/true"), Some(MemorySink::default()));
        let err = cage
            .run(&Workload::new("/bin/true"), Some(MemorySink::default()))
            .unwrap_err();
        assert!(matches!(err, CageError::InvalidState(CageState::Aborted)));
    }

    #[test]
    fn test_stats_track_the_run() {
        let mut cage = Cage::new(config()).with_filter_backend(Box::new(NoFilter));
        let before = cage.stats();
        assert_eq!(before.state, CageState::Configured);
        assert_eq!(before.filter_backend, None);
        assert_eq!(before.witness_entries, 0);

        cage.run(&Workload::new("/bin/true"), Some(MemorySink::default()))
            .unwrap();
        let after = cage.stats();
        assert_eq!(after.state, CageState::Completed);
        assert_eq!(after.filter_backend, Some("none"));
        assert!(after.sealed);
        assert_eq!(after.witness_entries, cage.witness_log().unwrap().len());
        assert!(after.witness_bytes > 0);
        assert_eq!(after.violations, 0);
    }

    #[test]
    fn test_witness_ceiling_aborts_the_run() {
        let config = CageConfig {
            max_witness_bytes: 512,
            ..config()
        };
        let mut cage = Cage::new(config).with_filter_backend(Box::new(NoFilter));
        let err = cage
            .run(&Workload::new("/bin/true"), Some(MemorySink::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            CageError::RecorderIo(RecorderError::WitnessTooLarge { limit: 512, .. })
        ));
        assert_eq!(cage.state(), CageState::Aborted);
        let stats = cage.stats();
        assert!(!stats.sealed);
        assert!(stats.witness_bytes <= 512);
    }
}
