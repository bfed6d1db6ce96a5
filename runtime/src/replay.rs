// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replay Engine
//!
//! Re-executes a recorded run from its witness log alone:
//! 1. verify the log (chain, root, contiguity, retained payloads)
//! 2. check the configured policy is the recorded one
//! 3. run a fresh cage on the recorded backend into an in-memory log
//! 4. compare the two runs, witness root first
//!
//! The original witness file is never written.

use crate::cage::Cage;
use crate::errors::ReplayError;
use crate::interceptor::RecordedBackend;
use cage_kernel::replay::{compare, compare_logs, DivergenceReport, ReplayArena};
use cage_kernel::types::{CageConfig, ExecutionResult, ExecutionSummary, Workload};
use cage_kernel::verify::verify_integrity;
use cage_kernel::witness::{MemorySink, WitnessLog};

#[derive(Debug)]
pub struct ReplayOutcome {
    pub result: ExecutionResult,
    pub log: WitnessLog,
    pub divergence: Option<DivergenceReport>,
}

impl ReplayOutcome {
    pub fn is_identical(&self) -> bool {
        self.divergence.is_none()
    }
}

/// Without the original summary only the log is available, and the root
/// already covers the hashes of stdout, stderr and the exit status.
fn compare_with_log(original_log: &WitnessLog, replayed_log: &WitnessLog) -> Option<DivergenceReport> {
    if original_log.merkle_root() == replayed_log.merkle_root() {
        return None;
    }
    Some(DivergenceReport::WitnessRoot {
        original: original_log.merkle_root(),
        replayed: replayed_log.merkle_root(),
        first_divergent_entry: compare_logs(original_log, replayed_log),
    })
}

pub fn replay(
    log: &WitnessLog,
    config: &CageConfig,
    original: Option<&ExecutionSummary>,
) -> Result<ReplayOutcome, ReplayError> {
    let outcome = run_replay(log, config, original);
    let label = match &outcome {
        Ok(o) if o.is_identical() => "identical",
        Ok(_) => "diverged",
        Err(_) => "failed",
    };
    metrics::increment_counter!("cage_replays_total", "outcome" => label);
    outcome
}

fn run_replay(
    log: &WitnessLog,
    config: &CageConfig,
    original: Option<&ExecutionSummary>,
) -> Result<ReplayOutcome, ReplayError> {
    let root = verify_integrity(log, config.merkle_workers)?;
    tracing::info!(
        "Replaying {} entries, root {}",
        log.len(),
        cage_kernel::hash::short_hex(&root)
    );

    if config.deterministic_seed.is_none() {
        return Err(ReplayError::MissingSeed);
    }

    let arena = ReplayArena::new(log);
    let recorded = arena.policy()?.policy_digest;
    let configured = config.effective_policy().digest();
    if recorded != configured {
        return Err(ReplayError::PolicyMismatch { recorded, configured });
    }
    let invocation = arena.invocation()?;

    let replay_config = CageConfig {
        enable_recording: true,
        ..config.clone()
    };
    let mut cage = Cage::with_backend(replay_config, RecordedBackend::new(log));
    let workload = Workload::new(invocation.program).args(invocation.args);
    let result = cage.run(&workload, Some(MemorySink::default()))?;

    let replayed_log = cage
        .witness_log()
        .cloned()
        .ok_or_else(|| crate::errors::CageError::Internal("replay produced no witness".into()))?;

    let divergence = match original {
        Some(summary) => compare(summary, log, &result.summary(), &replayed_log),
        None => compare_with_log(log, &replayed_log),
    };
    match &divergence {
        Some(report) => tracing::warn!("Replay diverged: {}", report),
        None => tracing::info!("Replay identical"),
    }

    Ok(ReplayOutcome {
        result,
        log: replayed_log,
        divergence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_kernel::error::IntegrityError;
    use cage_kernel::policy::OperationId;
    use cage_kernel::witness::WitnessRecorder;

    fn unsealed_log() -> WitnessLog {
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record_policy(&CageConfig::default().effective_policy()).unwrap();
        rec.abort().unwrap();
        rec.into_parts().0
    }

    fn sealed_policy_log(config: &CageConfig) -> WitnessLog {
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record_policy(&config.effective_policy()).unwrap();
        rec.record_invocation("/bin/true", &[]).unwrap();
        rec.seal().unwrap();
        rec.into_parts().0
    }

    #[test]
    fn test_truncated_log_is_not_replayed() {
        let config = CageConfig::recording([0u8; 32], "w.log");
        let err = replay(&unsealed_log(), &config, None).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Integrity(IntegrityError::NotSealed { truncated: true })
        ));
    }

    #[test]
    fn test_seed_required() {
        let config = CageConfig {
            enable_recording: false,
            ..CageConfig::default()
        };
        let log = sealed_policy_log(&config);
        assert!(matches!(replay(&log, &config, None), Err(ReplayError::MissingSeed)));
    }

    #[test]
    fn test_policy_change_rejected() {
        let config = CageConfig::recording([0u8; 32], "w.log");
        let log = sealed_policy_log(&config);
        let widened = config.clone().with_denied([OperationId::WallClockRead]);
        assert!(matches!(
            replay(&log, &widened, None),
            Err(ReplayError::PolicyMismatch { .. })
        ));
    }
}
