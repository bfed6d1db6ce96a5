// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Protocol constants.

/// Domain tag for hashing a single operation payload.
pub const DOMAIN_PAYLOAD: &str = "cage/witness/payload/v1";

/// Domain tag for the chained entry hash.
pub const DOMAIN_ENTRY: &str = "cage/witness/entry/v1";

/// Domain tag for Merkle leaves.
pub const DOMAIN_MERKLE_LEAF: &str = "cage/merkle/leaf/v1";

/// Domain tag for Merkle interior nodes.
pub const DOMAIN_MERKLE_NODE: &str = "cage/merkle/node/v1";

/// Domain tag for the root of an empty log.
pub const DOMAIN_MERKLE_EMPTY: &str = "cage/merkle/empty/v1";

/// Domain tag for the execution hash.
pub const DOMAIN_EXECUTION: &str = "cage/execution/v1";

/// Domain tag for syscall policy digests.
pub const DOMAIN_POLICY: &str = "cage/policy/v1";

/// Domain tag for content-addressed cage identifiers.
pub const DOMAIN_CAGE_ID: &str = "cage/id/v1";

/// Entry hash used as the predecessor of entry 0.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Size of one DRG keystream block in bytes.
pub const DRG_BLOCK_LEN: usize = 64;

/// Default size of the entropy pool offered to a workload.
pub const DEFAULT_ENTROPY_BYTES: usize = 256;

/// Upper bound on the entropy pool offered to a workload.
pub const MAX_ENTROPY_BYTES: usize = 1 << 20;

/// Default ceiling on the encoded size of one witness log.
pub const DEFAULT_MAX_WITNESS_BYTES: u64 = 256 << 20;

/// Default number of hashing workers used when sealing.
pub const DEFAULT_MERKLE_WORKERS: usize = 4;

/// Levels narrower than this are hashed on the calling thread.
pub const PARALLEL_HASH_THRESHOLD: usize = 256;

/// Number of entries appended to a sink between flushes.
pub const RECORDER_BATCH_SIZE: usize = 64;

/// Witness log file format version.
pub const WITNESS_FORMAT_VERSION: u32 = 1;
