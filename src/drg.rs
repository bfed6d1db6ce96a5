// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Deterministic Random Generator
//!
//! The only source of randomness a caged workload ever sees. Output is the
//! ChaCha20 keystream keyed by the master seed; the sequence counter is a
//! block position in that stream.
//!
//! # Guarantees
//! - Draw k is a pure function of `(seed, counter_at_draw, len)`
//! - Every draw starts on a fresh 64-byte block, so draw sizes never shift
//!   the bytes of later draws' blocks
//! - The state cannot be cloned; two holders would hand out the same bytes

use crate::config::DRG_BLOCK_LEN;
use crate::hash::{hash_bytes, Hash};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// ChaCha word position of the start of a block (16 words per block).
const WORDS_PER_BLOCK: u128 = (DRG_BLOCK_LEN / 4) as u128;

/// Number of keystream blocks consumed by a draw of `len` bytes.
pub fn blocks_for(len: usize) -> u64 {
    len.div_ceil(DRG_BLOCK_LEN) as u64
}

/// Bytes of a draw starting at block `counter`.
pub fn derive_from(seed: &[u8; 32], counter: u64, len: usize) -> Vec<u8> {
    let mut rng = ChaCha20Rng::from_seed(*seed);
    rng.set_word_pos(counter as u128 * WORDS_PER_BLOCK);
    let mut out = vec![0u8; len];
    rng.fill_bytes(&mut out);
    out
}

/// One draw from the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    /// Counter value before the draw.
    pub counter: u64,
    pub blocks: u64,
    pub bytes: Vec<u8>,
}

impl Draw {
    pub fn output_hash(&self) -> Hash {
        hash_bytes(&self.bytes)
    }
}

#[derive(Debug)]
pub struct DeterministicRandomState {
    master_seed: [u8; 32],
    sequence_counter: u64,
}

impl DeterministicRandomState {
    pub fn new(master_seed: [u8; 32]) -> Self {
        Self {
            master_seed,
            sequence_counter: 0,
        }
    }

    pub fn sequence_counter(&self) -> u64 {
        self.sequence_counter
    }

    pub fn master_seed(&self) -> &[u8; 32] {
        &self.master_seed
    }

    pub fn next_bytes(&mut self, len: usize) -> Draw {
        let counter = self.sequence_counter;
        let blocks = blocks_for(len);
        let bytes = derive_from(&self.master_seed, counter, len);
        self.sequence_counter += blocks;
        Draw { counter, blocks, bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draws_are_block_aligned() {
        let seed = [7u8; 32];
        let mut drg = DeterministicRandomState::new(seed);

        let a = drg.next_bytes(10);
        let b = drg.next_bytes(65);
        let c = drg.next_bytes(1);

        assert_eq!((a.counter, a.blocks), (0, 1));
        assert_eq!((b.counter, b.blocks), (1, 2));
        assert_eq!((c.counter, c.blocks), (3, 1));
        assert_eq!(drg.sequence_counter(), 4);

        // The first block of `b` is the second keystream block
        let stream = derive_from(&seed, 0, 4 * DRG_BLOCK_LEN);
        assert_eq!(&b.bytes[..], &stream[64..129]);
        assert_eq!(&c.bytes[..], &stream[192..193]);
    }

    #[test]
    fn test_zero_length_draw_consumes_nothing() {
        let mut drg = DeterministicRandomState::new([1u8; 32]);
        let d = drg.next_bytes(0);
        assert!(d.bytes.is_empty());
        assert_eq!(d.blocks, 0);
        assert_eq!(drg.sequence_counter(), 0);
    }
}
