//! Randomized chunk planning.

use rand::Rng;
use rand::rngs::StdRng;

use crate::types::BlockDescriptor;

/// Lazily partitions `[0, total)` into contiguous, disjoint blocks with
/// lengths drawn uniformly from `[min, max]`.
///
/// The planner is single-pass: descriptors come out in ascending offset
/// order and the sequence cannot be restarted. The final block is clamped
/// to the remaining tail, so it may be shorter than `min`.
pub struct ChunkPlanner {
    total: u64,
    min: u64,
    max: u64,
    offset: u64,
    sequence: u32,
    rng: StdRng,
}

impl ChunkPlanner {
    /// Creates a planner over `total` bytes.
    ///
    /// The size range is assumed valid (`1 <= min <= max <= u32::MAX`);
    /// [`TransferConfig::validate`](crate::TransferConfig::validate)
    /// enforces this before a job starts.
    pub fn new(total: u64, min: u64, max: u64, rng: StdRng) -> Self {
        Self {
            total,
            min,
            max,
            offset: 0,
            sequence: 0,
            rng,
        }
    }

    /// Produces the next block, or `None` once `[0, total)` is covered.
    ///
    /// A zero-byte file yields no blocks at all.
    pub fn next_block(&mut self) -> Option<BlockDescriptor> {
        let remaining = self.total - self.offset;
        if remaining == 0 {
            return None;
        }

        let sampled = self.rng.gen_range(self.min..=self.max);
        let len = sampled.min(remaining);
        let block = BlockDescriptor {
            sequence: self.sequence,
            offset: self.offset,
            len: len as u32,
        };
        self.offset += len;
        self.sequence += 1;
        Some(block)
    }
}
