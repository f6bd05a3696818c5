//! Broadcast-seeded pseudo-random generator.
//!
//! Every client reseeds its `SharedRandom` with the value the server
//! broadcasts, so identical seed sequences produce identical draws on every
//! screen. The generator is a plain 32-bit LCG: cheap, reproducible across
//! platforms, and good enough for cosmetic state.

use rand::{Error, RngCore};

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;

/// Linear-congruential generator reseeded from the server's shared seed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedRandom {
    seed: u32,
    state: u32,
}

impl SharedRandom {
    pub fn new(seed: u32) -> Self {
        Self { seed, state: seed }
    }

    /// Restart the sequence from a freshly broadcast seed.
    pub fn reseed(&mut self, seed: u32) {
        self.seed = seed;
        self.state = seed;
    }

    /// The seed the current sequence started from.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    fn step(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        self.state
    }

    /// Uniform value in [0, 1). Uses the high 24 bits; the low bits of an LCG are weak.
    pub fn next_f32(&mut self) -> f32 {
        (self.step() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform value in [min, max). Returns `min` for an empty or invalid range.
    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        if !(min.is_finite() && max.is_finite()) || max <= min {
            return if min.is_finite() { min } else { 0.0 };
        }
        min + (max - min) * self.next_f32()
    }
}

impl RngCore for SharedRandom {
    fn next_u32(&mut self) -> u32 {
        self.step()
    }

    fn next_u64(&mut self) -> u64 {
        let hi = self.step() as u64;
        let lo = self.step() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.step().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Derive the broadcast seed from canonical global time.
///
/// Time is bucketed to tenths so every seed tick inside the same bucket
/// carries the same seed, then scrambled with a multiplicative hash.
pub fn shared_seed_for(global_time: f64) -> u32 {
    if !global_time.is_finite() || global_time < 0.0 {
        return 0;
    }
    let bucket = (global_time * 10.0).floor() as u64;
    (bucket.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as u32
}
