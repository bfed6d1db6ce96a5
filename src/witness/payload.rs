// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical payload encodings.
//!
//! Structured payloads are bincode (standard config) so that the bytes, and
//! therefore the payload hash, are identical on every platform. Stream
//! payloads (stdin, stdout, stderr) are hashed as raw bytes.

use crate::error::{KernelError, KernelResult, RecorderError};
use crate::hash::Hash;
use crate::policy::{DenyAction, OperationId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const LABEL_POLICY: &str = "seccomp";
pub const LABEL_EXECVE: &str = "execve";
pub const LABEL_STDIN: &str = "stdin";
pub const LABEL_STDOUT: &str = "stdout";
pub const LABEL_STDERR: &str = "stderr";
pub const LABEL_ENTROPY: &str = "drg";
pub const LABEL_EXIT: &str = "exit";
pub const LABEL_VIOLATION: &str = "denied";
pub const LABEL_ENTROPY_DEVICE: &str = "entropy_device";

pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, RecorderError> {
    bincode::serde::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| RecorderError::Encoding(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> KernelResult<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| KernelError::Encoding(e.to_string()))?;
    if read != bytes.len() {
        return Err(KernelError::Encoding(format!(
            "{} trailing bytes after payload",
            bytes.len() - read
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentPayload {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationPayload {
    pub program: String,
    pub args: Vec<String>,
}

/// Everything needed to re-derive a DRG draw, and nothing that reveals it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyPayload {
    pub counter: u64,
    pub blocks: u64,
    pub len: u64,
    pub output_hash: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPayload {
    pub code: i32,
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPayload {
    pub policy_digest: Hash,
    pub deny_action: DenyAction,
    pub denied: Vec<OperationId>,
}

/// A denied call as the supervisor saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationPayload {
    pub operation: OperationId,
    pub call: String,
    pub deny_action: DenyAction,
}

/// An open of a kernel entropy device, served from the DRG pool instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyDevicePayload {
    pub path: String,
}
