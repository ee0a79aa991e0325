use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT_TRANSFERS, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_CHUNK_SIZE, TransferError,
};

/// Tuning knobs for a single transfer job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Smallest block size the planner may sample, in bytes.
    pub min_chunk_size: u64,
    /// Largest block size the planner may sample, in bytes.
    pub max_chunk_size: u64,
    /// Upper bound on blocks written concurrently.
    pub max_concurrent_transfers: usize,
    /// Write attempts per block before the job aborts.
    pub max_retries: u32,
    /// Seed for block sizing. `None` draws from OS entropy; a fixed seed
    /// makes the chunk plan reproducible.
    pub seed: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            max_retries: DEFAULT_MAX_RETRIES,
            seed: None,
        }
    }
}

impl TransferConfig {
    /// Rejects configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.min_chunk_size == 0
            || self.min_chunk_size > self.max_chunk_size
            || self.max_chunk_size > u64::from(u32::MAX)
        {
            return Err(TransferError::InvalidChunkRange {
                min: self.min_chunk_size,
                max: self.max_chunk_size,
            });
        }
        if self.max_concurrent_transfers == 0 {
            return Err(TransferError::InvalidConcurrency);
        }
        if self.max_retries == 0 {
            return Err(TransferError::InvalidRetries);
        }
        Ok(())
    }
}

/// One contiguous byte range of the file, the unit of concurrent transfer
/// and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    /// Position of this block in admission order.
    pub sequence: u32,
    /// Byte offset within the file.
    pub offset: u64,
    /// Size of this block in bytes.
    pub len: u32,
}

/// Result of one block's write-verify-retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutcome {
    /// Sequence number of the block this outcome belongs to.
    pub sequence: u32,
    /// Whether the written bytes eventually matched the source fingerprint.
    pub success: bool,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
}

/// Terminal result of a transfer job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOutcome {
    /// Every block verified and the whole-file digests match.
    Succeeded,
    /// All blocks verified individually but the final whole-file digests
    /// disagree. The destination is left in place for inspection; this
    /// points at a defect or a concurrent writer, not at the write channel.
    IntegrityMismatch,
    /// A block exhausted its retries. The destination was restored from
    /// backup or removed, matching its pre-job state.
    Aborted {
        /// Human-readable description of the failing block.
        reason: String,
    },
}

/// Phases of the transfer state machine, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferPhase {
    Init,
    Backup,
    Transferring,
    Verifying,
    Recovering,
    Done,
}
