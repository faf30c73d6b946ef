/*!
 * Scope guards for partial filesystem mutations
 *
 * Every primitive that leaves an intermediate entry on disk (staging file,
 * freshly created directory) arms one of these and dismisses it only once
 * the whole calling sequence has succeeded. Cleanup failures are logged,
 * never raised: the guard runs on unwind paths.
 */

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
enum GuardKind {
    File,
    DirRecursive,
}

/// Deletes the guarded path on drop unless dismissed.
#[derive(Debug)]
pub struct RemoveGuard {
    path: PathBuf,
    kind: GuardKind,
    armed: bool,
}

impl RemoveGuard {
    /// Guard a single file (or symlink)
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: GuardKind::File,
            armed: true,
        }
    }

    /// Guard a directory including anything created beneath it
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: GuardKind::DirRecursive,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The mutation is final; keep the entry.
    pub fn dismiss(mut self) {
        self.armed = false;
    }
}

impl Drop for RemoveGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = match self.kind {
            GuardKind::File => std::fs::remove_file(&self.path),
            GuardKind::DirRecursive => std::fs::remove_dir_all(&self.path),
        };
        match result {
            Ok(()) => tracing::debug!("rolled back {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("rollback of {} failed: {}", self.path.display(), err),
        }
    }
}
