// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Cage configuration.
//!
//! A `CageConfig` is built once, validated, and then only read. Every field
//! that can influence the workload's observable behaviour lives here, which
//! is what lets the cage id be a content address of this document.

use crate::config::{DEFAULT_ENTROPY_BYTES, DEFAULT_MAX_WITNESS_BYTES, DEFAULT_MERKLE_WORKERS, MAX_ENTROPY_BYTES};
use crate::error::ConfigError;
use crate::hash::serde_hex_opt;
use crate::policy::{default_denied, DenyAction, OperationId, SyscallPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Hard caps. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    #[serde(default, alias = "max_memory", skip_serializing_if = "Option::is_none")]
    pub max_memory_bytes: Option<u64>,
    #[serde(default, alias = "max_cpu_time", skip_serializing_if = "Option::is_none")]
    pub max_cpu_time_ms: Option<u64>,
    #[serde(default, alias = "max_wall_time", skip_serializing_if = "Option::is_none")]
    pub max_wall_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolationFlags {
    #[serde(default)]
    pub network_isolated: bool,
    #[serde(default)]
    pub filesystem_isolated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CageConfig {
    #[serde(default)]
    pub allowed_syscalls: BTreeSet<OperationId>,
    #[serde(default = "default_denied", alias = "blocked_syscalls")]
    pub denied_syscalls: BTreeSet<OperationId>,
    #[serde(default)]
    pub deny_action: DenyAction,
    #[serde(default = "default_true")]
    pub enable_recording: bool,
    #[serde(default = "default_witness_path")]
    pub witness_output_path: PathBuf,
    #[serde(default, with = "serde_hex_opt")]
    pub deterministic_seed: Option<[u8; 32]>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub isolation_flags: IsolationFlags,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default = "default_entropy_bytes")]
    pub entropy_bytes: usize,
    #[serde(default = "default_true")]
    pub retain_inputs: bool,
    #[serde(default = "default_merkle_workers")]
    pub merkle_workers: usize,
    /// Recording fails once the encoded entries would exceed this.
    #[serde(default = "default_max_witness_bytes")]
    pub max_witness_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_witness_path() -> PathBuf {
    PathBuf::from("witness.log")
}

fn default_entropy_bytes() -> usize {
    DEFAULT_ENTROPY_BYTES
}

fn default_merkle_workers() -> usize {
    DEFAULT_MERKLE_WORKERS
}

fn default_max_witness_bytes() -> u64 {
    DEFAULT_MAX_WITNESS_BYTES
}

impl Default for CageConfig {
    fn default() -> Self {
        Self {
            allowed_syscalls: BTreeSet::new(),
            denied_syscalls: default_denied(),
            deny_action: DenyAction::default(),
            enable_recording: true,
            witness_output_path: default_witness_path(),
            deterministic_seed: None,
            resource_limits: ResourceLimits::default(),
            isolation_flags: IsolationFlags::default(),
            environment: BTreeMap::new(),
            entropy_bytes: DEFAULT_ENTROPY_BYTES,
            retain_inputs: true,
            merkle_workers: DEFAULT_MERKLE_WORKERS,
            max_witness_bytes: DEFAULT_MAX_WITNESS_BYTES,
            work_dir: None,
        }
    }
}

impl CageConfig {
    /// Recording configuration with the default policy.
    pub fn recording(seed: [u8; 32], witness_output_path: impl Into<PathBuf>) -> Self {
        Self {
            deterministic_seed: Some(seed),
            witness_output_path: witness_output_path.into(),
            ..Self::default()
        }
    }

    pub fn with_denied(mut self, denied: impl IntoIterator<Item = OperationId>) -> Self {
        self.denied_syscalls = denied.into_iter().collect();
        self
    }

    pub fn with_deny_action(mut self, action: DenyAction) -> Self {
        self.deny_action = action;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Copy of this config whose relative witness path is anchored at `base`.
    pub fn resolved_in(&self, base: &Path) -> Self {
        let mut resolved = self.clone();
        if resolved.witness_output_path.is_relative() {
            resolved.witness_output_path = base.join(&self.witness_output_path);
        }
        resolved
    }

    /// Explicit denials plus whatever the isolation flags imply.
    pub fn effective_denied(&self) -> BTreeSet<OperationId> {
        let mut denied = self.denied_syscalls.clone();
        if self.isolation_flags.network_isolated {
            denied.insert(OperationId::NetworkAccess);
        }
        if self.isolation_flags.filesystem_isolated {
            denied.insert(OperationId::FilesystemEscape);
        }
        denied
    }

    pub fn effective_policy(&self) -> SyscallPolicy {
        SyscallPolicy::new(self.effective_denied(), self.deny_action)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_recording && self.deterministic_seed.is_none() {
            return Err(ConfigError::MissingSeed);
        }
        if self.enable_recording && self.witness_output_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyWitnessPath);
        }

        let denied = self.effective_denied();
        if let Some(op) = denied.iter().find(|op| op.is_safe()) {
            return Err(ConfigError::SafeOperationDenied(*op));
        }
        if let Some(op) = denied.intersection(&self.allowed_syscalls).next() {
            return Err(ConfigError::ConflictingOperation(*op));
        }

        let limits = [
            ("max_memory", self.resource_limits.max_memory_bytes),
            ("max_cpu_time", self.resource_limits.max_cpu_time_ms),
            ("max_wall_time", self.resource_limits.max_wall_time_ms),
        ];
        for (name, value) in limits {
            if value == Some(0) {
                return Err(ConfigError::InvalidLimit { name });
            }
        }

        if self.entropy_bytes > MAX_ENTROPY_BYTES {
            return Err(ConfigError::EntropyBudgetTooLarge {
                requested: self.entropy_bytes,
                max: MAX_ENTROPY_BYTES,
            });
        }
        if self.merkle_workers == 0 {
            return Err(ConfigError::NoMerkleWorkers);
        }
        if self.max_witness_bytes == 0 {
            return Err(ConfigError::InvalidLimit {
                name: "max_witness_bytes",
            });
        }

        for key in self.environment.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ConfigError::InvalidEnvironmentKey(key.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_requires_seed() {
        let config = CageConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingSeed));

        let config = CageConfig {
            enable_recording: false,
            ..CageConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_safe_subset_cannot_be_denied() {
        let config = CageConfig::recording([0u8; 32], "w.log").with_denied([OperationId::BasicIo]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::SafeOperationDenied(OperationId::BasicIo))
        );
    }

    #[test]
    fn test_isolation_conflicts_with_allow() {
        let mut config = CageConfig::recording([0u8; 32], "w.log");
        config.isolation_flags.network_isolated = true;
        config.allowed_syscalls.insert(OperationId::NetworkAccess);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ConflictingOperation(OperationId::NetworkAccess))
        );
    }

    #[test]
    fn test_json_defaults_and_aliases() {
        let json = r#"{
            "blocked_syscalls": ["wall_clock_read"],
            "deterministic_seed": "0000000000000000000000000000000000000000000000000000000000000000",
            "resource_limits": { "max_wall_time": 1000 }
        }"#;
        let config: CageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.denied_syscalls.len(), 1);
        assert_eq!(config.deterministic_seed, Some([0u8; 32]));
        assert_eq!(config.resource_limits.max_wall_time_ms, Some(1000));
        assert_eq!(config.entropy_bytes, DEFAULT_ENTROPY_BYTES);
        assert_eq!(config.max_witness_bytes, DEFAULT_MAX_WITNESS_BYTES);
        assert!(config.enable_recording);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let config = CageConfig::recording([0u8; 32], "w.log").with_limits(ResourceLimits {
            max_cpu_time_ms: Some(0),
            ..ResourceLimits::default()
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLimit { name: "max_cpu_time" })
        );

        let config = CageConfig {
            max_witness_bytes: 0,
            ..CageConfig::recording([0u8; 32], "w.log")
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLimit {
                name: "max_witness_bytes"
            })
        );
    }
}
