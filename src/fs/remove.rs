/*!
 * Removal primitives
 */

use std::path::Path;

use crate::error::FsError;
use crate::fs::info::{exists, PathKind};
use crate::pathutil::fs_path;

/// Remove a single file or symlink.
///
/// A missing path returns `false` without error: the user may have deleted
/// the item manually between scan and execution.
pub fn remove_file(path: &Path) -> Result<bool, FsError> {
    match std::fs::remove_file(fs_path(path).as_ref()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        #[cfg(windows)]
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            // a read-only attribute blocks deletion; clear it and retry once
            if let Ok(meta) = std::fs::symlink_metadata(path) {
                let mut perms = meta.permissions();
                if perms.readonly() {
                    perms.set_readonly(false);
                    let _ = std::fs::set_permissions(path, perms);
                    return match std::fs::remove_file(path) {
                        Ok(()) => Ok(true),
                        Err(retry_err) => Err(FsError::from_io(path, retry_err)),
                    };
                }
            }
            Err(FsError::from_io(path, err))
        }
        Err(err) => Err(FsError::from_io(path, err)),
    }
}

/// Remove a directory tree.
///
/// A symlink to a directory loses only the link itself. Real directories
/// are enumerated one level at a time so every removal can be reported to
/// `progress` before the parent goes away.
pub fn remove_dir(path: &Path, progress: &mut dyn FnMut(&Path)) -> Result<(), FsError> {
    match exists(path) {
        PathKind::Missing => return Ok(()),
        PathKind::Symlink => {
            remove_symlink(path)?;
            progress(path);
            return Ok(());
        }
        PathKind::File => {
            remove_file(path)?;
            progress(path);
            return Ok(());
        }
        PathKind::Dir => {}
    }

    let entries =
        std::fs::read_dir(fs_path(path).as_ref()).map_err(|err| FsError::from_io(path, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| FsError::from_io(path, err))?;
        let child = entry.path();
        match exists(&child) {
            PathKind::Dir => remove_dir(&child, progress)?,
            PathKind::Missing => {}
            _ => {
                remove_file(&child)?;
                progress(&child);
            }
        }
    }

    std::fs::remove_dir(fs_path(path).as_ref()).map_err(|err| FsError::from_io(path, err))?;
    progress(path);
    Ok(())
}

fn remove_symlink(path: &Path) -> Result<(), FsError> {
    #[cfg(windows)]
    {
        // directory links are directory objects to the delete call
        if std::fs::remove_file(path).is_ok() {
            return Ok(());
        }
        return std::fs::remove_dir(path).map_err(|err| FsError::from_io(path, err));
    }
    #[cfg(not(windows))]
    {
        std::fs::remove_file(path).map_err(|err| FsError::from_io(path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_missing_file_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_file(&dir.path().join("ghost")).unwrap());
    }

    #[test]
    fn test_remove_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(remove_file(&file).unwrap());
        assert!(!file.exists());
    }

    #[test]
    fn test_remove_dir_reports_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a"), b"1").unwrap();
        std::fs::write(root.join("sub/b"), b"2").unwrap();

        let mut reported = Vec::new();
        remove_dir(&root, &mut |p| reported.push(p.to_path_buf())).unwrap();

        assert!(!root.exists());
        // children reported before their parents
        assert_eq!(reported.len(), 4);
        let root_pos = reported.iter().position(|p| p == &root).unwrap();
        assert_eq!(root_pos, reported.len() - 1);
        let sub = root.join("sub");
        let sub_pos = reported.iter().position(|p| p == &sub).unwrap();
        let b_pos = reported.iter().position(|p| p == &sub.join("b")).unwrap();
        assert!(b_pos < sub_pos);
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_dir_symlink_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut count = 0;
        remove_dir(&link, &mut |_| count += 1).unwrap();
        assert_eq!(count, 1);
        assert!(!link.exists());
        assert!(target.join("keep").exists());
    }
}
