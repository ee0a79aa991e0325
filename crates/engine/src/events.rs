use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{BlockOutcome, TransferPhase};

/// Capacity of the event channel handed out by
/// [`TransferOrchestrator::take_events`](crate::TransferOrchestrator::take_events).
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Structured observability events emitted during a transfer.
///
/// One `PhaseChanged` per state-machine transition and one `BlockAttempt`
/// per write attempt. Delivery is best-effort: if no receiver was taken or
/// the receiver falls behind, events are dropped rather than stalling the
/// transfer. The same information also goes to `tracing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    /// The job moved to a new phase of its state machine.
    PhaseChanged {
        phase: TransferPhase,
        message: String,
    },
    /// One write attempt on one block.
    BlockAttempt {
        sequence: u32,
        offset: u64,
        size: u32,
        /// Fingerprint of the bytes actually written this attempt.
        fingerprint: u32,
        attempt: u32,
        matched: bool,
    },
    /// A block finished its retry loop.
    BlockCompleted { outcome: BlockOutcome },
}

/// Sends an event without blocking, dropping it if the channel is full or
/// the receiver is gone.
pub(crate) fn emit(tx: &mpsc::Sender<TransferEvent>, event: TransferEvent) {
    let _ = tx.try_send(event);
}
