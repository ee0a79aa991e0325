//! Destination backup and restore.
//!
//! A preexisting destination is snapshotted to a sibling `.bak` file
//! before the first write. The snapshot can be copied back over the
//! destination if the job aborts, and is deleted when the guard drops,
//! whichever way the job ends.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Scoped snapshot of a preexisting destination file.
///
/// Holds `None` when the destination did not exist; [`restore`](Self::restore)
/// is then a no-op. Dropping the guard removes the snapshot from disk, so
/// the artifact cannot outlive the job on any exit path.
#[derive(Debug)]
pub(crate) struct Backup {
    path: Option<PathBuf>,
}

impl Backup {
    /// Snapshots `dest` if it exists.
    pub(crate) fn create(dest: &Path) -> io::Result<Self> {
        if !dest.exists() {
            return Ok(Self { path: None });
        }
        let backup_path = backup_path_for(dest);
        std::fs::copy(dest, &backup_path)?;
        debug!(path = %backup_path.display(), "destination snapshotted");
        Ok(Self {
            path: Some(backup_path),
        })
    }

    /// True if a snapshot was taken, i.e. the destination preexisted.
    pub(crate) fn exists(&self) -> bool {
        self.path.is_some()
    }

    /// Copies the snapshot back over `dest`. No-op without a snapshot.
    pub(crate) fn restore(&self, dest: &Path) -> io::Result<()> {
        if let Some(path) = &self.path {
            std::fs::copy(path, dest)?;
            debug!(path = %dest.display(), "destination restored from snapshot");
        }
        Ok(())
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(e) = std::fs::remove_file(&path)
        {
            warn!(path = %path.display(), error = %e, "failed to remove backup snapshot");
        }
    }
}

/// Sibling snapshot path: `<dest>.bak`.
fn backup_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}
