/*!
 * Path helpers: long-path prefixing, staging names, base-path normalization
 *
 * Everything here is pure string manipulation so it stays unit-testable on
 * every platform; the `fs` layer decides where to apply it.
 */

use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Maximum path length Win32 APIs accept without the extended prefix
pub const MAX_PATH: usize = 260;

/// Extension used for in-flight staging copies
pub const STAGING_EXTENSION: &str = ".ffs_tmp";

const LONG_PATH_PREFIX: &str = r"\\?\";
const LONG_PATH_PREFIX_UNC: &str = r"\\?\UNC";

/// Prepend the extended-length prefix when a Win32 call would need it.
///
/// Paths shorter than the threshold pass through untouched, except those
/// ending in a space or dot, which Win32 silently trims unless prefixed.
/// Already-prefixed paths and relative paths pass through as well.
pub fn apply_long_path_prefix(path: &str) -> String {
    apply_prefix_impl(path, MAX_PATH)
}

/// Variant for directory creation: the threshold reserves 12 characters so
/// an 8.3 alias can still be generated inside the new directory.
pub fn apply_long_path_prefix_create_dir(path: &str) -> String {
    apply_prefix_impl(path, MAX_PATH - 12)
}

fn apply_prefix_impl(path: &str, max_len: usize) -> String {
    let needs_prefix = path.len() >= max_len || path.ends_with(' ') || path.ends_with('.');
    if needs_prefix && !path.starts_with(LONG_PATH_PREFIX) {
        if let Some(unc_rest) = path.strip_prefix(r"\\") {
            // \\server\share -> \\?\UNC\server\share
            return format!("{}\\{}", LONG_PATH_PREFIX_UNC, unc_rest);
        }
        if is_drive_absolute(path) {
            return format!("{}{}", LONG_PATH_PREFIX, path);
        }
        // relative paths must not be prefixed
    }
    path.to_string()
}

/// Inverse of `apply_long_path_prefix`, for paths shown to the user.
pub fn remove_long_path_prefix(path: &str) -> String {
    if let Some(rest) = path.strip_prefix(LONG_PATH_PREFIX_UNC) {
        return format!("\\{}", rest);
    }
    if let Some(rest) = path.strip_prefix(LONG_PATH_PREFIX) {
        return rest.to_string();
    }
    path.to_string()
}

fn is_drive_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// A path as handed to the OS: on Windows, long or trailing-dot/space
/// paths get the extended-length prefix; everywhere else the path passes
/// through untouched.
pub fn fs_path(path: &Path) -> Cow<'_, Path> {
    #[cfg(windows)]
    {
        let text = path.to_string_lossy();
        let prefixed = apply_long_path_prefix(&text);
        if prefixed.len() != text.len() {
            return Cow::Owned(PathBuf::from(prefixed));
        }
    }
    Cow::Borrowed(path)
}

/// Variant for directory creation, with its lower prefix threshold.
pub fn fs_path_create_dir(path: &Path) -> Cow<'_, Path> {
    #[cfg(windows)]
    {
        let text = path.to_string_lossy();
        let prefixed = apply_long_path_prefix_create_dir(&text);
        if prefixed.len() != text.len() {
            return Cow::Owned(PathBuf::from(prefixed));
        }
    }
    Cow::Borrowed(path)
}

/// First candidate staging sibling for `target`: `<target>.ffs_tmp`.
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(STAGING_EXTENSION);
    PathBuf::from(name)
}

/// Numbered fallback when the plain staging name is taken: `<target>_N.ffs_tmp`.
pub fn staging_path_numbered(target: &Path, n: u32) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!("_{}{}", n, STAGING_EXTENSION));
    PathBuf::from(name)
}

/// Whether a directory entry is a leftover staging file from a crashed run.
pub fn is_staging_name(name: &str) -> bool {
    name.ends_with(STAGING_EXTENSION)
}

/// Base directory paths are stored with exactly one trailing separator.
pub fn with_trailing_separator(path: &Path) -> PathBuf {
    let s = path.as_os_str().to_string_lossy();
    if s.ends_with(std::path::MAIN_SEPARATOR) {
        path.to_path_buf()
    } else {
        let mut out = path.as_os_str().to_os_string();
        out.push(std::path::MAIN_SEPARATOR.to_string());
        PathBuf::from(out)
    }
}
