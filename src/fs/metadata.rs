/*!
 * Permission and attribute copying
 *
 * Each sub-copy (mode, ownership, security context) is attempted
 * independently; only mode and ownership failures are errors. A missing
 * security-context attribute or an unsupported attribute namespace is
 * normal cross-filesystem behavior and is quietly tolerated.
 */

use std::path::Path;

use crate::error::FsError;

/// Copy permission mode and ownership from `src` to `dst`.
pub fn copy_permissions(src: &Path, dst: &Path, follow_symlinks: bool) -> Result<(), FsError> {
    copy_mode(src, dst, follow_symlinks)?;
    copy_ownership(src, dst, follow_symlinks)?;
    copy_security_context(src, dst, follow_symlinks);
    Ok(())
}

/// Copy the permission bits (the read-only attribute on Windows).
pub fn copy_mode(src: &Path, dst: &Path, follow_symlinks: bool) -> Result<(), FsError> {
    if !follow_symlinks {
        // symlinks carry no permission bits of their own worth copying
        return Ok(());
    }
    let meta = std::fs::metadata(src).map_err(|err| FsError::from_io(src, err))?;
    std::fs::set_permissions(dst, meta.permissions()).map_err(|err| FsError::from_io(dst, err))
}

/// Copy owner and group.
#[cfg(unix)]
pub fn copy_ownership(src: &Path, dst: &Path, follow_symlinks: bool) -> Result<(), FsError> {
    use std::os::unix::fs::MetadataExt;

    let meta = if follow_symlinks {
        std::fs::metadata(src)
    } else {
        std::fs::symlink_metadata(src)
    }
    .map_err(|err| FsError::from_io(src, err))?;

    let uid = Some(meta.uid());
    let gid = Some(meta.gid());
    let result = if follow_symlinks {
        std::os::unix::fs::chown(dst, uid, gid)
    } else {
        std::os::unix::fs::lchown(dst, uid, gid)
    };
    result.map_err(|err| FsError::from_io(dst, err))
}

#[cfg(not(unix))]
pub fn copy_ownership(_src: &Path, _dst: &Path, _follow_symlinks: bool) -> Result<(), FsError> {
    Ok(())
}

/// Copy the security-context extended attribute where present. Failure is
/// expected off SELinux systems and never surfaces.
#[cfg(unix)]
fn copy_security_context(src: &Path, dst: &Path, follow_symlinks: bool) {
    const SELINUX_ATTR: &str = "security.selinux";
    if !follow_symlinks {
        return;
    }
    match xattr::get(src, SELINUX_ATTR) {
        Ok(Some(context)) => {
            if let Err(err) = xattr::set(dst, SELINUX_ATTR, &context) {
                tracing::debug!(
                    "cannot set security context on {}: {}",
                    dst.display(),
                    err
                );
            }
        }
        Ok(None) => {}
        Err(err) => {
            tracing::debug!(
                "cannot read security context of {}: {}",
                src.display(),
                err
            );
        }
    }
}

#[cfg(not(unix))]
fn copy_security_context(_src: &Path, _dst: &Path, _follow_symlinks: bool) {}

/// Copy directory flags from a template (read-only and friends where the
/// platform has them). Unsupported flags are tolerated with a log line.
pub fn copy_directory_flags(template: &Path, dst: &Path) {
    match std::fs::metadata(template) {
        Ok(meta) => {
            if let Err(err) = std::fs::set_permissions(dst, meta.permissions()) {
                tracing::debug!(
                    "cannot copy directory flags from {} to {}: {}",
                    template.display(),
                    dst.display(),
                    err
                );
            }
        }
        Err(err) => {
            tracing::debug!("cannot read template flags of {}: {}", template.display(), err);
        }
    }
}
