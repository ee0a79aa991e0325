//! Per-block write, verify, retry.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::TransferError;
use crate::digest::block_fingerprint;
use crate::events::{self, TransferEvent};
use crate::fault::WriteChannel;
use crate::types::{BlockDescriptor, BlockOutcome};

/// Writes one block to the destination and verifies it, retrying
/// fingerprint mismatches with exponential backoff.
///
/// The source fingerprint is computed once from `data`, before any write.
/// Each attempt pushes the block through the write channel, writes the
/// transformed bytes under the destination lock (seek plus write as one
/// critical section), then compares the fingerprint of the written bytes
/// against the source fingerprint. The comparison goes through the
/// fingerprints on purpose: it is the same check a reader of the
/// destination would perform, covering both channel corruption and
/// source/destination divergence.
///
/// Backoff after a failed attempt `n` is `2^n` seconds and never holds the
/// destination lock. A mismatch is transient and retried; seek or write
/// errors are fatal and propagate immediately. Failed attempts do leave
/// their corrupted bytes at the block's range until a later attempt or the
/// recovery path overwrites them.
pub(crate) async fn transfer_block(
    dest: Arc<Mutex<File>>,
    channel: Arc<dyn WriteChannel>,
    events_tx: mpsc::Sender<TransferEvent>,
    descriptor: BlockDescriptor,
    data: Vec<u8>,
    max_retries: u32,
) -> Result<BlockOutcome, TransferError> {
    let source_fingerprint = block_fingerprint(&data);

    for attempt in 1..=max_retries {
        let written = channel.transform(descriptor.sequence, attempt, &data);

        {
            let mut file = dest.lock().unwrap();
            file.seek(SeekFrom::Start(descriptor.offset))?;
            file.write_all(&written)?;
        }

        let written_fingerprint = block_fingerprint(&written);
        let matched = written_fingerprint == source_fingerprint;

        events::emit(
            &events_tx,
            TransferEvent::BlockAttempt {
                sequence: descriptor.sequence,
                offset: descriptor.offset,
                size: descriptor.len,
                fingerprint: written_fingerprint,
                attempt,
                matched,
            },
        );

        if matched {
            debug!(sequence = descriptor.sequence, attempt, "block verified");
            return Ok(BlockOutcome {
                sequence: descriptor.sequence,
                success: true,
                attempts: attempt,
            });
        }

        warn!(
            sequence = descriptor.sequence,
            offset = descriptor.offset,
            attempt,
            "block fingerprint mismatch"
        );

        if attempt < max_retries {
            tokio::time::sleep(backoff_after(attempt)).await;
        }
    }

    Ok(BlockOutcome {
        sequence: descriptor.sequence,
        success: false,
        attempts: max_retries,
    })
}

/// Backoff after failed attempt `n`: `2^n` seconds, no jitter. The
/// exponent is clamped to keep the shift in range for oversized retry
/// limits.
fn backoff_after(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(62))
}
