/*!
 * Rename and move primitives
 *
 * `rename` is the cheap same-volume path; `move_file` and `move_dir`
 * recover its `DifferentVolume` failure by falling back to copy-then-remove.
 */

use std::path::Path;

use crate::error::{FsError, FsErrorKind, Result, SyncError};
use crate::fs::copy::{copy_file, create_dir, CopyObserver, CopyOptions};
use crate::fs::info::{exists, PathKind};
use crate::fs::remove::{remove_dir, remove_file};
use crate::fs::symlink::copy_symlink;
use crate::pathutil::fs_path;

/// Rename an entry.
///
/// Fails with `DifferentVolume` when the endpoints live on different
/// filesystems (callers fall back to copying) and with `TargetExists` when
/// the target slot is taken and the platform refuses to replace it.
pub fn rename(old: &Path, new: &Path) -> std::result::Result<(), FsError> {
    match std::fs::rename(fs_path(old).as_ref(), fs_path(new).as_ref()) {
        Ok(()) => Ok(()),
        #[cfg(windows)]
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            // a read-only target blocks the replace; clear and retry once
            if let Ok(meta) = std::fs::symlink_metadata(new) {
                let mut perms = meta.permissions();
                if perms.readonly() {
                    perms.set_readonly(false);
                    let _ = std::fs::set_permissions(new, perms);
                    return std::fs::rename(fs_path(old).as_ref(), fs_path(new).as_ref())
                        .map_err(|e| FsError::from_io(old, e));
                }
            }
            Err(FsError::from_io(old, err))
        }
        Err(err) => Err(FsError::from_io(old, err)),
    }
}

/// Move a file, falling back to copy + remove across volumes.
pub fn move_file(src: &Path, dst: &Path, observer: &mut dyn CopyObserver) -> Result<()> {
    match rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.kind == FsErrorKind::DifferentVolume => {
            copy_file(src, dst, CopyOptions::default(), observer)?;
            remove_file(src).map_err(SyncError::Fs)?;
            Ok(())
        }
        Err(err) => Err(SyncError::Fs(err)),
    }
}

/// Move a directory, falling back to a level-by-level copy across volumes.
pub fn move_dir(src: &Path, dst: &Path, observer: &mut dyn CopyObserver) -> Result<()> {
    match rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(err) if err.kind == FsErrorKind::DifferentVolume => {}
        Err(err) => return Err(SyncError::Fs(err)),
    }

    // moved children must survive even if a later sibling fails, so the
    // new directory is committed immediately
    create_dir(dst, Some(src), false)
        .map_err(SyncError::Fs)?
        .dismiss();

    let entries = std::fs::read_dir(src).map_err(|err| SyncError::Fs(FsError::from_io(src, err)))?;
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::Fs(FsError::from_io(src, err)))?;
        let child_src = entry.path();
        let child_dst = dst.join(entry.file_name());
        match exists(&child_src) {
            PathKind::Dir => move_dir(&child_src, &child_dst, observer)?,
            PathKind::Symlink => {
                copy_symlink(&child_src, &child_dst, false).map_err(SyncError::Fs)?;
                remove_file(&child_src).map_err(SyncError::Fs)?;
            }
            PathKind::File => move_file(&child_src, &child_dst, observer)?,
            PathKind::Missing => {}
        }
    }

    std::fs::remove_dir(src).map_err(|err| SyncError::Fs(FsError::from_io(src, err)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::copy::NoopCopyObserver;

    #[test]
    fn test_rename_same_volume() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        std::fs::write(&old, b"x").unwrap();

        rename(&old, &new).unwrap();
        assert!(!old.exists());
        assert_eq!(std::fs::read(&new).unwrap(), b"x");
    }

    #[test]
    fn test_move_file_same_volume() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("sub/dst");
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(&src, b"payload").unwrap();

        move_file(&src, &dst, &mut NoopCopyObserver).unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn test_move_dir_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(src.join("inner")).unwrap();
        std::fs::write(src.join("a"), b"1").unwrap();
        std::fs::write(src.join("inner/b"), b"2").unwrap();

        let dst = dir.path().join("moved");
        move_dir(&src, &dst, &mut NoopCopyObserver).unwrap();

        assert!(!src.exists());
        assert_eq!(std::fs::read(dst.join("a")).unwrap(), b"1");
        assert_eq!(std::fs::read(dst.join("inner/b")).unwrap(), b"2");
    }

    #[test]
    fn test_rename_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = rename(&dir.path().join("ghost"), &dir.path().join("new")).unwrap_err();
        assert_eq!(err.kind, FsErrorKind::PathNotFound);
    }
}
