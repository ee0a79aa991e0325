//! Write-channel fault model.
//!
//! Every block passes through a [`WriteChannel`] before it reaches the
//! destination, modeling an unreliable write path. The default channel is
//! a pass-through; tests and demos can swap in a corrupting channel to
//! exercise the retry protocol.

use std::borrow::Cow;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Transform applied to a block's bytes on every write attempt.
///
/// Implementations receive the block's sequence number and the 1-based
/// attempt number, so a channel can target specific blocks or attempts.
pub trait WriteChannel: Send + Sync {
    /// Returns the bytes that will actually be written for this attempt.
    fn transform<'a>(&self, sequence: u32, attempt: u32, data: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Pass-through channel: the write path is reliable.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl WriteChannel for Identity {
    fn transform<'a>(&self, _sequence: u32, _attempt: u32, data: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(data)
    }
}

/// Channel that flips one random bit of the block with the given
/// probability per attempt.
///
/// Owns a seeded RNG so a given seed reproduces the same corruption
/// pattern run after run.
pub struct RandomCorruption {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl RandomCorruption {
    /// Creates a channel corrupting each attempt with `probability`
    /// (clamped to `[0, 1]`).
    pub fn new(probability: f64, seed: u64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl WriteChannel for RandomCorruption {
    fn transform<'a>(&self, _sequence: u32, _attempt: u32, data: &'a [u8]) -> Cow<'a, [u8]> {
        if data.is_empty() {
            return Cow::Borrowed(data);
        }
        let mut rng = self.rng.lock().unwrap();
        if !rng.gen_bool(self.probability) {
            return Cow::Borrowed(data);
        }
        let mut corrupted = data.to_vec();
        let byte = rng.gen_range(0..corrupted.len());
        let bit = rng.gen_range(0..8u32);
        corrupted[byte] ^= 1 << bit;
        Cow::Owned(corrupted)
    }
}
