//! Advisory process lock
//!
//! Held on `.orc/orc.lock` to stop two engine processes from operating on
//! the same project database. Acquisition fails fast; the lock releases on
//! drop or process exit.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use super::error::{StoreError, StoreResult};

/// Exclusive lock on one project
pub struct ProjectLock {
    path: PathBuf,
    file: File,
}

impl ProjectLock {
    /// Try to take the lock; fails fast with `ProjectBusy` when another
    /// process holds it.
    pub fn acquire(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(&path)?;

        file.try_lock_exclusive().map_err(|_| StoreError::ProjectBusy)?;
        debug!(path = %path.display(), "Acquired project lock");

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "Released project lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join(".orc").join("orc.lock");

        let lock = ProjectLock::acquire(&lock_path).unwrap();
        assert!(lock_path.exists());

        // Second acquisition in the same process fails fast
        assert!(matches!(ProjectLock::acquire(&lock_path), Err(StoreError::ProjectBusy)));

        drop(lock);

        // Released: can acquire again
        let _relock = ProjectLock::acquire(&lock_path).unwrap();
    }
}
