//! Top-level transfer state machine.
//!
//! Init → Backup → Transferring → {Verifying | Recovering} → Done.
//! The backup snapshot of a preexisting destination is released on every
//! exit path, including errors.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::TransferError;
use crate::backup::Backup;
use crate::digest::file_digest;
use crate::events::{self, EVENT_CHANNEL_CAPACITY, TransferEvent};
use crate::fault::{Identity, WriteChannel};
use crate::planner::ChunkPlanner;
use crate::scheduler;
use crate::types::{TransferConfig, TransferOutcome, TransferPhase};

/// Orchestrates one file transfer end to end.
///
/// Owns the configuration, the injectable write channel, and the event
/// channel handed to observers via [`take_events`](Self::take_events).
///
/// ```no_run
/// # async fn run() -> Result<(), blockhaul_engine::TransferError> {
/// use blockhaul_engine::{TransferConfig, TransferOrchestrator};
/// use std::path::Path;
///
/// let mut orchestrator = TransferOrchestrator::new(TransferConfig::default());
/// let mut events = orchestrator.take_events().unwrap();
/// tokio::spawn(async move { while events.recv().await.is_some() {} });
///
/// let outcome = orchestrator
///     .transfer(Path::new("big.iso"), Path::new("/mnt/backup/big.iso"))
///     .await?;
/// # Ok(()) }
/// ```
pub struct TransferOrchestrator {
    config: TransferConfig,
    channel: Arc<dyn WriteChannel>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl TransferOrchestrator {
    /// Creates an orchestrator with the default (reliable) write channel.
    pub fn new(config: TransferConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            channel: Arc::new(Identity),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Replaces the write channel, e.g. with a corrupting one in tests.
    pub fn with_write_channel(mut self, channel: Arc<dyn WriteChannel>) -> Self {
        self.channel = channel;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Copies `src` to `dst` in concurrent verified blocks.
    ///
    /// On [`TransferOutcome::Succeeded`] the destination is byte-identical
    /// to the source. On [`TransferOutcome::Aborted`] the destination was
    /// restored to its pre-job state, or removed if it did not exist.
    /// I/O faults surface as `Err` after the same best-effort recovery.
    /// Whatever the outcome, no backup snapshot survives the call, and the
    /// last event observers see is a `Done` phase change.
    pub async fn transfer(
        &self,
        src: &Path,
        dst: &Path,
    ) -> Result<TransferOutcome, TransferError> {
        let result = self.run_to_completion(src, dst).await;
        if let Err(e) = &result {
            self.phase(TransferPhase::Done, format!("failed: {e}"));
        }
        result
    }

    async fn run_to_completion(
        &self,
        src: &Path,
        dst: &Path,
    ) -> Result<TransferOutcome, TransferError> {
        self.config.validate()?;

        // Init: open the source and size the job.
        self.phase(
            TransferPhase::Init,
            format!("{} -> {}", src.display(), dst.display()),
        );
        let mut source = File::open(src)?;
        let total = source.metadata()?.len();
        let dest_preexisted = dst.exists();

        // Backup: snapshot a preexisting destination before truncating it.
        self.phase(
            TransferPhase::Backup,
            if dest_preexisted {
                "snapshotting existing destination".to_string()
            } else {
                "destination is new, nothing to snapshot".to_string()
            },
        );
        let backup = Backup::create(dst)?;

        // Open and preallocate the destination. From here on, every
        // failure path has to put the destination back into its pre-job
        // state before returning.
        let dest = match open_destination(dst, total) {
            Ok(file) => Arc::new(Mutex::new(file)),
            Err(e) => {
                self.recover_best_effort(dst, &backup);
                return Err(e.into());
            }
        };

        // Transferring: bounded pool of block workers.
        self.phase(TransferPhase::Transferring, format!("{total} bytes"));
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let planner = ChunkPlanner::new(
            total,
            self.config.min_chunk_size,
            self.config.max_chunk_size,
            rng,
        );
        let report = scheduler::run(
            planner,
            &mut source,
            Arc::clone(&dest),
            Arc::clone(&self.channel),
            self.events_tx.clone(),
            self.config.max_concurrent_transfers,
            self.config.max_retries,
        )
        .await;

        // Every worker has been joined, so this closes the destination.
        drop(dest);

        let outcome = match report {
            Ok(report) => match report.first_failure {
                None => {
                    self.phase(TransferPhase::Verifying, "comparing whole-file digests".to_string());
                    let src_digest = file_digest(src)?;
                    let dst_digest = file_digest(dst)?;
                    if src_digest == dst_digest {
                        info!(
                            blocks = report.outcomes.len(),
                            digest = %dst_digest,
                            "transfer verified"
                        );
                        TransferOutcome::Succeeded
                    } else {
                        error!(
                            source = %src_digest,
                            destination = %dst_digest,
                            "whole-file digest mismatch after all blocks verified"
                        );
                        TransferOutcome::IntegrityMismatch
                    }
                }
                Some(sequence) => {
                    self.recover(dst, &backup)?;
                    TransferOutcome::Aborted {
                        reason: format!(
                            "block {sequence} failed after {} attempts",
                            self.config.max_retries
                        ),
                    }
                }
            },
            Err(e) => {
                // Fatal fault mid-transfer: still try to leave the
                // destination in its pre-job state before propagating.
                self.recover_best_effort(dst, &backup);
                return Err(e);
            }
        };

        // Done: the snapshot is removed when the guard drops.
        self.phase(TransferPhase::Done, format!("{outcome:?}"));
        drop(backup);
        Ok(outcome)
    }

    /// Puts the destination back into its pre-job state: restore from the
    /// snapshot when one exists, otherwise remove the partial file.
    fn recover(&self, dst: &Path, backup: &Backup) -> Result<(), TransferError> {
        self.phase(TransferPhase::Recovering, "undoing partial transfer".to_string());
        if backup.exists() {
            info!(path = %dst.display(), "restoring destination from snapshot");
            backup.restore(dst)?;
        } else {
            info!(path = %dst.display(), "removing partially written destination");
            std::fs::remove_file(dst)?;
        }
        Ok(())
    }

    fn recover_best_effort(&self, dst: &Path, backup: &Backup) {
        if let Err(e) = self.recover(dst, backup) {
            warn!(path = %dst.display(), error = %e, "recovery failed");
        }
    }

    fn phase(&self, phase: TransferPhase, message: String) {
        info!(?phase, message = %message, "transfer phase");
        events::emit(&self.events_tx, TransferEvent::PhaseChanged { phase, message });
    }
}

/// Copies `src` to `dst` with `config` over a reliable write channel.
///
/// One-call wrapper around [`TransferOrchestrator`] for callers that do
/// not consume events.
pub async fn transfer_file(
    src: &Path,
    dst: &Path,
    config: TransferConfig,
) -> Result<TransferOutcome, TransferError> {
    TransferOrchestrator::new(config).transfer(src, dst).await
}

/// Creates (or truncates) the destination and preallocates its final
/// length, so concurrent workers can land blocks anywhere in the file.
fn open_destination(dst: &Path, total: u64) -> std::io::Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)?;
    file.set_len(total)?;
    Ok(file)
}
