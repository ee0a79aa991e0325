//! Bounded-concurrency block scheduling.

use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::TransferError;
use crate::events::{self, TransferEvent};
use crate::fault::WriteChannel;
use crate::planner::ChunkPlanner;
use crate::types::BlockOutcome;
use crate::worker;

/// Aggregate result of scheduling every admitted block.
#[derive(Debug)]
pub(crate) struct ScheduleReport {
    /// Outcomes of all blocks that ran, in completion order.
    pub(crate) outcomes: Vec<BlockOutcome>,
    /// Sequence number of the first block observed to exhaust its retries.
    pub(crate) first_failure: Option<u32>,
}

/// Drives the planner through a bounded pool of block workers.
///
/// Blocks are admitted in ascending offset order, each one's source bytes
/// read before dispatch; completions may arrive in any order, which is
/// fine because every worker writes a disjoint byte range. After the first
/// failed outcome no further blocks are admitted, but in-flight workers
/// run to completion; the recovery path owns the final state of the
/// destination, so their writes are harmless.
///
/// A worker I/O error (as opposed to a corruption mismatch) also halts
/// admission, drains the pool, and then propagates.
pub(crate) async fn run(
    mut planner: ChunkPlanner,
    source: &mut File,
    dest: Arc<Mutex<File>>,
    channel: Arc<dyn WriteChannel>,
    events_tx: mpsc::Sender<TransferEvent>,
    max_concurrent: usize,
    max_retries: u32,
) -> Result<ScheduleReport, TransferError> {
    let mut in_flight: JoinSet<Result<BlockOutcome, TransferError>> = JoinSet::new();
    let mut outcomes = Vec::new();
    let mut first_failure: Option<u32> = None;
    let mut fatal: Option<TransferError> = None;
    let mut next = planner.next_block();

    loop {
        // Admit until the window is full, the plan runs out, or the job
        // has failed.
        while first_failure.is_none() && fatal.is_none() && in_flight.len() < max_concurrent {
            let Some(descriptor) = next else { break };

            // The planner walks the file front to back, so a sequential
            // cursor read always lines up with the descriptor.
            let mut data = vec![0u8; descriptor.len as usize];
            if let Err(e) = source.read_exact(&mut data) {
                // Stop admitting but let in-flight workers finish before
                // the error propagates.
                fatal = Some(e.into());
                break;
            }

            debug!(
                sequence = descriptor.sequence,
                offset = descriptor.offset,
                size = descriptor.len,
                "admitting block"
            );
            in_flight.spawn(worker::transfer_block(
                Arc::clone(&dest),
                Arc::clone(&channel),
                events_tx.clone(),
                descriptor,
                data,
                max_retries,
            ));
            next = planner.next_block();
        }

        let Some(joined) = in_flight.join_next().await else {
            // Nothing in flight and nothing admissible.
            break;
        };

        match joined {
            Ok(Ok(outcome)) => {
                events::emit(&events_tx, TransferEvent::BlockCompleted { outcome });
                if !outcome.success && first_failure.is_none() {
                    warn!(
                        sequence = outcome.sequence,
                        attempts = outcome.attempts,
                        "block failed after all retries; halting admission"
                    );
                    first_failure = Some(outcome.sequence);
                }
                outcomes.push(outcome);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "block worker hit a fatal fault; halting admission");
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
            Err(join_err) => {
                if fatal.is_none() {
                    fatal = Some(TransferError::WorkerPanic(join_err.to_string()));
                }
            }
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    Ok(ScheduleReport {
        outcomes,
        first_failure,
    })
}
