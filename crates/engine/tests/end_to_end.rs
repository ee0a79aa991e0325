//! End-to-end transfer scenarios: clean copies, injected corruption with
//! retries, aborts with restore/removal, and backup artifact lifetime.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use blockhaul_engine::{
    TransferConfig, TransferError, TransferEvent, TransferOrchestrator, TransferOutcome,
    TransferPhase, WriteChannel, block_fingerprint, file_digest, transfer_file,
};

/// Corrupts the first `attempts` write attempts of one block.
struct CorruptBlock {
    sequence: u32,
    attempts: u32,
}

impl WriteChannel for CorruptBlock {
    fn transform<'a>(&self, sequence: u32, attempt: u32, data: &'a [u8]) -> Cow<'a, [u8]> {
        if sequence == self.sequence && attempt <= self.attempts && !data.is_empty() {
            let mut bad = data.to_vec();
            bad[0] ^= 0x01;
            Cow::Owned(bad)
        } else {
            Cow::Borrowed(data)
        }
    }
}

/// The CRC-32 generator polynomial, bit-reflected into the byte order the
/// fingerprint consumes. XOR-ing a buffer with any multiple of the
/// polynomial leaves its CRC-32 unchanged, because the checksum is linear
/// over GF(2).
const CRC_NEUTRAL_MASK: [u8; 5] = [0x41, 0x06, 0x71, 0xDB, 0x01];

/// Corrupts the first block without disturbing its CRC-32 fingerprint.
/// Every block verifies, so only the whole-file digest can catch it.
struct SilentCorruption;

impl WriteChannel for SilentCorruption {
    fn transform<'a>(&self, sequence: u32, _attempt: u32, data: &'a [u8]) -> Cow<'a, [u8]> {
        if sequence == 0 && data.len() >= CRC_NEUTRAL_MASK.len() {
            let mut bad = data.to_vec();
            for (byte, mask) in bad.iter_mut().zip(CRC_NEUTRAL_MASK) {
                *byte ^= mask;
            }
            Cow::Owned(bad)
        } else {
            Cow::Borrowed(data)
        }
    }
}

fn sequential_fill(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn three_mib_source(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("src.bin");
    std::fs::write(&path, sequential_fill(3 * 1024 * 1024)).unwrap();
    path
}

fn config() -> TransferConfig {
    TransferConfig {
        min_chunk_size: 1024 * 1024,
        max_chunk_size: 2 * 1024 * 1024,
        max_concurrent_transfers: 2,
        max_retries: 5,
        seed: Some(17),
    }
}

fn backup_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn drain(rx: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn clean_three_mib_transfer() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");

    let mut orchestrator = TransferOrchestrator::new(config());
    let mut rx = orchestrator.take_events().unwrap();

    let outcome = orchestrator.transfer(&src, &dst).await.unwrap();
    assert_eq!(outcome, TransferOutcome::Succeeded);
    assert_eq!(file_digest(&dst).unwrap(), file_digest(&src).unwrap());

    let events = drain(&mut rx);

    // One completion per attempted block, every block clean on attempt 1.
    let mut attempts_per_block: HashMap<u32, u32> = HashMap::new();
    let mut completions = 0;
    for event in &events {
        match event {
            TransferEvent::BlockAttempt {
                sequence, matched, ..
            } => {
                *attempts_per_block.entry(*sequence).or_default() += 1;
                assert!(*matched);
            }
            TransferEvent::BlockCompleted { outcome } => {
                completions += 1;
                assert!(outcome.success);
                assert_eq!(outcome.attempts, 1);
            }
            TransferEvent::PhaseChanged { .. } => {}
        }
    }
    assert!(completions >= 2, "3 MiB in 1-2 MiB blocks is at least two blocks");
    assert_eq!(attempts_per_block.len(), completions);
    assert!(attempts_per_block.values().all(|&n| n == 1));

    // Phases in order, no recovery.
    let phases: Vec<TransferPhase> = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            TransferPhase::Init,
            TransferPhase::Backup,
            TransferPhase::Transferring,
            TransferPhase::Verifying,
            TransferPhase::Done,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn single_corrupt_attempt_is_retried() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");

    let mut orchestrator = TransferOrchestrator::new(config()).with_write_channel(Arc::new(
        CorruptBlock {
            sequence: 1,
            attempts: 1,
        },
    ));
    let mut rx = orchestrator.take_events().unwrap();

    let outcome = orchestrator.transfer(&src, &dst).await.unwrap();
    assert_eq!(outcome, TransferOutcome::Succeeded);
    assert_eq!(file_digest(&dst).unwrap(), file_digest(&src).unwrap());

    for event in drain(&mut rx) {
        if let TransferEvent::BlockCompleted { outcome } = event {
            assert!(outcome.success);
            let expected = if outcome.sequence == 1 { 2 } else { 1 };
            assert_eq!(outcome.attempts, expected);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn abort_restores_preexisting_destination() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");

    let original = b"precious existing data".to_vec();
    std::fs::write(&dst, &original).unwrap();
    let original_digest = file_digest(&dst).unwrap();

    let orchestrator = TransferOrchestrator::new(config()).with_write_channel(Arc::new(
        CorruptBlock {
            sequence: 0,
            attempts: u32::MAX,
        },
    ));

    let outcome = orchestrator.transfer(&src, &dst).await.unwrap();
    assert!(matches!(outcome, TransferOutcome::Aborted { .. }));

    assert_eq!(file_digest(&dst).unwrap(), original_digest);
    assert_eq!(std::fs::read(&dst).unwrap(), original);
    assert!(!backup_path(&dst).exists(), "backup artifact must not survive the job");
}

#[tokio::test(start_paused = true)]
async fn abort_removes_new_destination() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");

    let orchestrator = TransferOrchestrator::new(config()).with_write_channel(Arc::new(
        CorruptBlock {
            sequence: 0,
            attempts: u32::MAX,
        },
    ));

    let outcome = orchestrator.transfer(&src, &dst).await.unwrap();
    match outcome {
        TransferOutcome::Aborted { reason } => assert!(reason.contains("block 0")),
        other => panic!("expected abort, got {other:?}"),
    }

    assert!(!dst.exists(), "newly created destination must be removed");
    assert!(!backup_path(&dst).exists());
}

#[tokio::test]
async fn fingerprint_collision_is_caught_by_whole_file_digest() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");
    std::fs::write(&dst, b"previous contents").unwrap();

    // The corruption really is invisible to the per-block fingerprint.
    let sample = sequential_fill(64);
    let tweaked = SilentCorruption.transform(0, 1, &sample);
    assert_ne!(&*tweaked, &sample[..]);
    assert_eq!(block_fingerprint(&tweaked), block_fingerprint(&sample));

    let mut orchestrator =
        TransferOrchestrator::new(config()).with_write_channel(Arc::new(SilentCorruption));
    let mut rx = orchestrator.take_events().unwrap();

    let outcome = orchestrator.transfer(&src, &dst).await.unwrap();
    assert_eq!(outcome, TransferOutcome::IntegrityMismatch);

    let events = drain(&mut rx);

    // Every block passed its own check on the first attempt.
    for event in &events {
        if let TransferEvent::BlockCompleted { outcome } = event {
            assert!(outcome.success);
            assert_eq!(outcome.attempts, 1);
        }
    }

    // The mismatch is reported, not recovered: the damaged destination
    // stays in place for inspection, and no snapshot survives.
    let phases: Vec<TransferPhase> = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert!(phases.contains(&TransferPhase::Verifying));
    assert!(!phases.contains(&TransferPhase::Recovering));

    assert!(dst.exists());
    assert_eq!(
        std::fs::metadata(&dst).unwrap().len(),
        std::fs::metadata(&src).unwrap().len()
    );
    assert_ne!(file_digest(&dst).unwrap(), file_digest(&src).unwrap());
    assert!(!backup_path(&dst).exists());
}

#[tokio::test]
async fn repeated_transfer_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");

    let first = transfer_file(&src, &dst, config()).await.unwrap();
    assert_eq!(first, TransferOutcome::Succeeded);

    // Second run overwrites an existing, identical destination.
    let second = transfer_file(&src, &dst, config()).await.unwrap();
    assert_eq!(second, TransferOutcome::Succeeded);

    assert_eq!(file_digest(&dst).unwrap(), file_digest(&src).unwrap());
    assert!(!backup_path(&dst).exists());
}

#[tokio::test]
async fn zero_byte_source_succeeds() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("empty.bin");
    std::fs::write(&src, b"").unwrap();
    let dst = dir.path().join("dst.bin");

    let outcome = transfer_file(&src, &dst, config()).await.unwrap();
    assert_eq!(outcome, TransferOutcome::Succeeded);
    assert_eq!(std::fs::metadata(&dst).unwrap().len(), 0);
}

#[tokio::test]
async fn missing_source_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("does-not-exist.bin");
    let dst = dir.path().join("dst.bin");

    let result = transfer_file(&src, &dst, config()).await;
    assert!(matches!(result, Err(TransferError::Io(_))));
    assert!(!dst.exists());
}

#[tokio::test]
async fn error_exit_still_reaches_done_phase() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    // Opening the destination fails because its parent directory is gone.
    let dst = dir.path().join("missing-dir").join("dst.bin");

    let mut orchestrator = TransferOrchestrator::new(config());
    let mut rx = orchestrator.take_events().unwrap();

    let result = orchestrator.transfer(&src, &dst).await;
    assert!(matches!(result, Err(TransferError::Io(_))));

    // Observers see the state machine terminate even on an early exit.
    let phases: Vec<TransferPhase> = drain(&mut rx)
        .iter()
        .filter_map(|e| match e {
            TransferEvent::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases.first(), Some(&TransferPhase::Init));
    assert_eq!(phases.last(), Some(&TransferPhase::Done));
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_io() {
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");

    let bad = TransferConfig {
        min_chunk_size: 2 * 1024 * 1024,
        max_chunk_size: 1024 * 1024,
        ..config()
    };
    let result = transfer_file(&src, &dst, bad).await;
    assert!(matches!(result, Err(TransferError::InvalidChunkRange { .. })));
    assert!(!dst.exists());
}

#[tokio::test(start_paused = true)]
async fn random_corruption_still_converges() {
    // A low-probability corrupting channel: some attempts fail, the retry
    // protocol absorbs them, and the file still lands intact.
    let dir = TempDir::new().unwrap();
    let src = three_mib_source(&dir);
    let dst = dir.path().join("dst.bin");

    let channel = Arc::new(blockhaul_engine::RandomCorruption::new(0.3, 5));
    let orchestrator = TransferOrchestrator::new(config()).with_write_channel(channel);

    // The all-or-nothing invariant holds whichever way the dice fall:
    // either the destination is a verified copy, or it is gone.
    match orchestrator.transfer(&src, &dst).await.unwrap() {
        TransferOutcome::Succeeded => {
            assert_eq!(file_digest(&dst).unwrap(), file_digest(&src).unwrap());
        }
        TransferOutcome::Aborted { .. } => assert!(!dst.exists()),
        TransferOutcome::IntegrityMismatch => panic!("block-verified transfer cannot mismatch"),
    }
    assert!(!backup_path(&dst).exists());
}
