//! Verified concurrent block transfer for single files.
//!
//! Copies a file in randomized-size blocks, writing several blocks
//! concurrently, verifying each written block against a fingerprint of its
//! source bytes, and retrying corrupted blocks with exponential backoff.
//! When a block cannot be written correctly the destination is restored to
//! its pre-transfer state (or removed if it did not exist). A successful
//! transfer is re-verified end to end with a whole-file SHA-256 digest.

mod backup;
mod digest;
mod events;
mod fault;
mod orchestrator;
mod planner;
mod scheduler;
mod types;
mod worker;

pub use digest::{block_fingerprint, file_digest};
pub use events::TransferEvent;
pub use fault::{Identity, RandomCorruption, WriteChannel};
pub use orchestrator::{TransferOrchestrator, transfer_file};
pub use planner::ChunkPlanner;
pub use types::{
    BlockDescriptor, BlockOutcome, TransferConfig, TransferOutcome, TransferPhase,
};

/// Default minimum block size: 1 MiB.
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default maximum block size: 2 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Default number of blocks in flight at once.
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 4;

/// Default number of write attempts per block.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk size range: {min}..={max}")]
    InvalidChunkRange { min: u64, max: u64 },

    #[error("max_concurrent_transfers must be at least 1")]
    InvalidConcurrency,

    #[error("max_retries must be at least 1")]
    InvalidRetries,

    #[error("block worker panicked: {0}")]
    WorkerPanic(String),
}
