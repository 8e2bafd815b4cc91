//! Scoped removal of a data channel's filesystem entry.

use std::io;
use std::path::{Path, PathBuf};

/// Removes the FIFO at `path` when dropped, unless already removed.
///
/// The reader holds one of these from the moment its data channel exists, so
/// an error or an interrupt anywhere in the session still cleans up.
#[derive(Debug)]
pub struct FifoGuard {
    path: PathBuf,
    armed: bool,
}

impl FifoGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove now and report the outcome. A missing entry counts as removed.
    pub fn remove(mut self) -> io::Result<()> {
        self.armed = false;
        remove_entry(&self.path)
    }

    /// Leave the entry on disk.
    pub fn defuse(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for FifoGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = remove_entry(&self.path) {
            tracing::warn!(
                "Failed to remove data channel {}: {}",
                self.path.display(),
                e
            );
        } else {
            tracing::debug!("Removed data channel {}", self.path.display());
        }
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
