/*!
 * Symlink primitives
 */

use std::path::Path;

use crate::error::{FsError, FsErrorKind};
use crate::fs::guard::RemoveGuard;
use crate::fs::info::{read_attributes, set_mtime};
use crate::hierarchy::LinkKind;
use crate::pathutil::fs_path;

/// Raw link contents, relative or absolute.
///
/// On Windows the reparse target of absolute symlinks and junctions comes
/// back with the `\??\` NT namespace prefix, which is stripped before the
/// text is compared or re-created.
pub fn get_symlink_target_text(path: &Path) -> Result<String, FsError> {
    let target =
        std::fs::read_link(fs_path(path).as_ref()).map_err(|err| FsError::from_io(path, err))?;
    let text = target.to_string_lossy().into_owned();
    Ok(strip_nt_prefix(&text).to_string())
}

fn strip_nt_prefix(text: &str) -> &str {
    text.strip_prefix(r"\??\").unwrap_or(text)
}

/// Kind of an existing symlink, from its dereferenced target; a broken
/// link defaults to a file link.
pub fn symlink_kind(path: &Path) -> LinkKind {
    match std::fs::metadata(fs_path(path).as_ref()) {
        Ok(meta) if meta.is_dir() => LinkKind::DirLink,
        _ => LinkKind::FileLink,
    }
}

/// Create a symlink of the given kind. The kind only matters on Windows,
/// where directory links are a distinct object.
pub fn create_symlink(target: &str, link: &Path, kind: LinkKind) -> Result<(), FsError> {
    #[cfg(unix)]
    {
        let _ = kind;
        std::os::unix::fs::symlink(target, fs_path(link).as_ref())
            .map_err(|err| FsError::from_io(link, err))
    }
    #[cfg(windows)]
    {
        let sys = fs_path(link);
        let result = match kind {
            LinkKind::DirLink => std::os::windows::fs::symlink_dir(target, sys.as_ref()),
            LinkKind::FileLink => std::os::windows::fs::symlink_file(target, sys.as_ref()),
        };
        result.map_err(|err| FsError::from_io(link, err))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, kind);
        Err(FsError::new(
            FsErrorKind::AttributeUnsupported,
            link,
            "symlinks not supported on this platform",
        ))
    }
}

/// Re-create `src`'s link at `dst` with the same raw target and kind, then
/// copy `src`'s mtime onto the new link without dereferencing either side.
pub fn copy_symlink(src: &Path, dst: &Path, copy_permissions: bool) -> Result<(), FsError> {
    let target = get_symlink_target_text(src)?;
    if target.is_empty() {
        return Err(FsError::new(
            FsErrorKind::Io,
            src,
            "symlink target could not be read",
        ));
    }
    let kind = symlink_kind(src);

    create_symlink(&target, dst, kind)?;
    let guard = RemoveGuard::file(dst);

    let attrs = read_attributes(src, false)?;
    set_mtime(dst, attrs.mtime, false)?;

    if copy_permissions {
        crate::fs::metadata::copy_ownership(src, dst, false)?;
    }

    guard.dismiss();
    Ok(())
}
