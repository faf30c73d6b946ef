/*!
 * Path probing, attributes, timestamps, volume identity
 *
 * Also home of the FAT daylight-saving workaround: FAT stores local times,
 * so a DST transition shifts every apparent mtime by one hour. The codec
 * below hides the true UTC mtime inside the (creation, write) timestamp
 * pair using a marker pattern in the creation field; `read_attributes`
 * undoes it, so round-trips survive DST changes. Encoding engages only on
 * volumes `is_fat_volume` recognizes.
 */

use filetime::FileTime;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsErrorKind};
use crate::pathutil::fs_path;

/// What an `exists` probe found. Symlinks exist even when broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
    Symlink,
    Missing,
}

/// Probe a path without following symlinks.
pub fn exists(path: &Path) -> PathKind {
    match std::fs::symlink_metadata(fs_path(path).as_ref()) {
        Err(_) => PathKind::Missing,
        Ok(meta) => {
            let file_type = meta.file_type();
            if file_type.is_symlink() {
                PathKind::Symlink
            } else if file_type.is_dir() {
                PathKind::Dir
            } else {
                PathKind::File
            }
        }
    }
}

/// Size and mtime of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub mtime: i64,
}

/// Read size and mtime, optionally following a symlink.
///
/// On FAT volumes the DST workaround is reversed here: when the creation
/// field carries the marker pattern, the true UTC mtime is recovered from
/// the (creation, write) pair instead of the raw write time.
pub fn read_attributes(path: &Path, follow_symlinks: bool) -> Result<Attributes, FsError> {
    let meta = metadata_for(path, follow_symlinks)?;
    let mut mtime = FileTime::from_last_modification_time(&meta).unix_seconds();

    if !meta.is_dir() && is_fat_volume(path) {
        if let Ok(created) = meta.created() {
            let created = FileTime::from_system_time(created).unix_seconds();
            if let Some(utc) = fat_decode_utc_time(created, mtime) {
                mtime = utc;
            }
        }
    }

    Ok(Attributes {
        size: meta.len(),
        mtime,
    })
}

fn metadata_for(path: &Path, follow_symlinks: bool) -> Result<Metadata, FsError> {
    let sys = fs_path(path);
    let result = if follow_symlinks {
        std::fs::metadata(sys.as_ref())
    } else {
        std::fs::symlink_metadata(sys.as_ref())
    };
    result.map_err(|err| FsError::from_io(path, err))
}

/// Set the mtime of an entry, optionally without following a symlink.
///
/// Read-only targets are handled by clearing and restoring the read-only
/// attribute around the write. On FAT volumes the desired UTC time is
/// additionally encoded into the creation field so `read_attributes` can
/// round-trip it.
pub fn set_mtime(path: &Path, mtime: i64, follow_symlinks: bool) -> Result<(), FsError> {
    let file_time = FileTime::from_unix_time(mtime, 0);

    let apply = |time: FileTime| -> std::io::Result<()> {
        let sys = fs_path(path);
        if follow_symlinks {
            filetime::set_file_mtime(sys.as_ref(), time)
        } else {
            filetime::set_symlink_file_times(sys.as_ref(), time, time)
        }
    };

    match apply(file_time) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            // read-only target: clear, write, restore
            let meta = metadata_for(path, follow_symlinks)?;
            let mut perms = meta.permissions();
            if perms.readonly() {
                let restore = perms.clone();
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                std::fs::set_permissions(path, perms).map_err(|e| FsError::from_io(path, e))?;
                let outcome = apply(file_time);
                let _ = std::fs::set_permissions(path, restore);
                outcome.map_err(|e| FsError::from_io(path, e))?;
            } else {
                return Err(FsError::from_io(path, err));
            }
        }
        Err(err) => return Err(FsError::from_io(path, err)),
    }

    if follow_symlinks && is_fat_volume(path) {
        apply_fat_encoding(path, mtime);
    }
    Ok(())
}

/// Best-effort write of the encoded (creation, write) pair; only possible
/// where the platform lets us set creation times.
fn apply_fat_encoding(path: &Path, mtime: i64) {
    let (_created, _write) = fat_encode_utc_time(mtime);
    #[cfg(windows)]
    {
        use std::fs::FileTimes;
        use std::os::windows::fs::FileTimesExt;
        let times = FileTimes::new()
            .set_created(std::time::UNIX_EPOCH + std::time::Duration::from_secs(_created as u64))
            .set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(_write as u64));
        let result = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_times(times));
        if let Err(err) = result {
            tracing::debug!("cannot encode FAT timestamps on {}: {}", path.display(), err);
        }
    }
    let _ = path;
}

// ---------------------------------------------------------------------------
// FAT UTC codec
//
// The creation field carries a marker in its high bits and the UTC mtime in
// its low bits; the write field stays the plain mtime. A pair without the
// marker is untouched foreign data.

const FAT_UTC_MARKER: i64 = 0x0FA7_0000_0000_0000;
const FAT_UTC_MASK: i64 = 0x7FFF_0000_0000_0000u64 as i64;
const FAT_UTC_VALUE_MASK: i64 = 0x0000_FFFF_FFFF_FFFF;

/// Encode a UTC mtime into a (creation, write) pair.
pub fn fat_encode_utc_time(utc_mtime: i64) -> (i64, i64) {
    let created = FAT_UTC_MARKER | (utc_mtime & FAT_UTC_VALUE_MASK);
    (created, utc_mtime)
}

/// Whether a creation field carries the UTC marker.
pub fn fat_has_utc_encoded(created: i64) -> bool {
    (created & FAT_UTC_MASK) == FAT_UTC_MARKER
}

/// Recover the UTC mtime from an encoded pair; `None` when the marker is
/// absent and the raw write time is authoritative.
pub fn fat_decode_utc_time(created: i64, _write: i64) -> Option<i64> {
    if fat_has_utc_encoded(created) {
        Some(created & FAT_UTC_VALUE_MASK)
    } else {
        None
    }
}

/// Whether a path lives on a FAT-family volume.
#[cfg(target_os = "linux")]
pub fn is_fat_volume(path: &Path) -> bool {
    fat_mount_table()
        .iter()
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, is_fat)| *is_fat)
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
fn fat_mount_table() -> Vec<(PathBuf, bool)> {
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        return Vec::new();
    };
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount = fields.next()?;
            let fstype = fields.next()?;
            Some((
                PathBuf::from(mount),
                matches!(fstype, "vfat" | "msdos" | "fat" | "exfat"),
            ))
        })
        .collect()
}

/// No cheap probe available; the DST workaround simply never engages.
#[cfg(not(target_os = "linux"))]
pub fn is_fat_volume(_path: &Path) -> bool {
    false
}

/// Answer of a volume-identity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMatch {
    Same,
    Different,
    Unknown,
}

/// Whether two paths live on the same volume. Neither path needs to exist:
/// the deepest existing ancestor stands in for it.
pub fn same_volume(a: &Path, b: &Path) -> VolumeMatch {
    match (volume_id(a), volume_id(b)) {
        (Some(x), Some(y)) if x == y => VolumeMatch::Same,
        (Some(_), Some(_)) => VolumeMatch::Different,
        _ => VolumeMatch::Unknown,
    }
}

#[cfg(unix)]
fn volume_id(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    deepest_existing_ancestor(path)
        .and_then(|p| std::fs::symlink_metadata(p).ok())
        .map(|meta| meta.dev())
}

#[cfg(windows)]
fn volume_id(path: &Path) -> Option<u64> {
    // drive letter stands in for a volume identifier
    use std::path::Component;
    let ancestor = deepest_existing_ancestor(path)?;
    match ancestor.components().next()? {
        Component::Prefix(prefix) => {
            let text = prefix.as_os_str().to_string_lossy().to_uppercase();
            let mut hash = 0u64;
            for b in text.bytes() {
                hash = hash.wrapping_mul(31).wrapping_add(u64::from(b));
            }
            Some(hash)
        }
        _ => None,
    }
}

fn deepest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    loop {
        if std::fs::symlink_metadata(&current).is_ok() {
            return Some(current);
        }
        current = current.parent()?.to_path_buf();
    }
}

/// Volume-stable identifier of a file, when the platform exposes one.
/// Survives renames on the same volume, so it can pair moved files.
#[cfg(unix)]
pub fn stable_file_id(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::symlink_metadata(path).ok().map(|meta| meta.ino())
}

#[cfg(not(unix))]
pub fn stable_file_id(_path: &Path) -> Option<u64> {
    None
}

/// Map an attribute failure that the caller may tolerate.
pub fn attribute_unsupported(path: &Path, message: impl Into<String>) -> FsError {
    FsError::new(FsErrorKind::AttributeUnsupported, path, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_exists_distinguishes_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let sub = dir.path().join("d");
        std::fs::create_dir(&sub).unwrap();

        assert_eq!(exists(&file), PathKind::File);
        assert_eq!(exists(&sub), PathKind::Dir);
        assert_eq!(exists(&dir.path().join("missing")), PathKind::Missing);
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_exists() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink("no_such_target", &link).unwrap();
        assert_eq!(exists(&link), PathKind::Symlink);
    }

    #[test]
    fn test_read_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let mut handle = std::fs::File::create(&file).unwrap();
        handle.write_all(b"hello").unwrap();
        drop(handle);

        let attrs = read_attributes(&file, true).unwrap();
        assert_eq!(attrs.size, 5);
        assert!(attrs.mtime > 0);
    }

    #[test]
    fn test_set_mtime_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        set_mtime(&file, 1_000_000_000, true).unwrap();
        let attrs = read_attributes(&file, true).unwrap();
        assert_eq!(attrs.mtime, 1_000_000_000);
    }

    #[test]
    fn test_set_mtime_on_readonly_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&file, perms).unwrap();

        set_mtime(&file, 1_000_000_000, true).unwrap();
        assert_eq!(read_attributes(&file, true).unwrap().mtime, 1_000_000_000);
        // attribute restored
        assert!(std::fs::metadata(&file).unwrap().permissions().readonly());

        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        std::fs::set_permissions(&file, perms).unwrap();
    }

    #[test]
    fn test_same_volume_within_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a/b/c");
        let b = dir.path().join("x");
        assert_eq!(same_volume(&a, &b), VolumeMatch::Same);
    }

    #[test]
    fn test_fat_codec_round_trip() {
        for mtime in [0i64, 1, 1_700_000_000, 4_000_000_000] {
            let (created, write) = fat_encode_utc_time(mtime);
            assert!(fat_has_utc_encoded(created));
            assert_eq!(fat_decode_utc_time(created, write), Some(mtime));
        }
    }

    #[test]
    fn test_fat_codec_rejects_foreign_pairs() {
        // ordinary creation times never carry the marker
        assert!(!fat_has_utc_encoded(1_700_000_000));
        assert_eq!(fat_decode_utc_time(1_700_000_000, 1_700_003_600), None);
    }

    #[test]
    fn test_fat_codec_dst_shift_invisible() {
        // write field shifted by one hour (DST), decode still exact
        let utc = 1_698_541_200;
        let (created, _) = fat_encode_utc_time(utc);
        assert_eq!(fat_decode_utc_time(created, utc + 3600), Some(utc));
    }
}
