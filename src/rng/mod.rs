//! Deterministic random source for loot rolls.
//!
//! - `RandomSource` is the only RNG surface the engine consumes
//! - `GRandom` wraps Xoshiro256++ so a seed replays bit-identically on any platform
//! - `derive_seed` splits one base seed into independent per-roll streams

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use sha3::{Digest, Sha3_256};

/// Random number stream consumed by pickers, loot tables and Eval
pub trait RandomSource {
    fn next_u64(&mut self) -> u64;

    /// Uniform integer in `[min, max_exclusive)`, `min` when the range is empty
    fn next_in_range(&mut self, min: i32, max_exclusive: i32) -> i32;

    /// Uniform float in `[0, 1)`
    fn next_float(&mut self) -> f32;

    /// True with `pct` percent probability
    fn next_pct(&mut self, pct: i32) -> bool {
        self.next_in_range(0, 100) < pct
    }

    fn next_float_range(&mut self, min: f32, max: f32) -> f32 {
        if max <= min {
            return min;
        }
        min + (max - min) * self.next_float()
    }

    /// Uniform 64-bit integer in `[min, max_exclusive)`
    fn next_i64_range(&mut self, min: i64, max_exclusive: i64) -> i64 {
        if max_exclusive <= min {
            return min;
        }
        let span = max_exclusive.abs_diff(min);
        min.wrapping_add((self.next_u64() % span) as i64)
    }
}

/// Seeded game RNG
#[derive(Debug, Clone)]
pub struct GRandom {
    seed: u64,
    inner: Xoshiro256PlusPlus,
}

impl GRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for GRandom {
    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn next_in_range(&mut self, min: i32, max_exclusive: i32) -> i32 {
        if max_exclusive <= min {
            return min;
        }
        self.inner.gen_range(min..max_exclusive)
    }

    fn next_float(&mut self) -> f32 {
        self.inner.gen::<f32>()
    }
}

/// Deterministic sub-seed from a base seed and a stream index
pub fn derive_seed(base_seed: u64, index: u64) -> u64 {
    let mut hasher = Sha3_256::new();
    hasher.update(base_seed.to_le_bytes());
    hasher.update(index.to_le_bytes());
    let result = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&result[0..8]);
    u64::from_le_bytes(bytes)
}
