/*!
 * Directory creation and transactional file copy
 */

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsErrorKind, Result, SyncError};
use crate::fs::guard::RemoveGuard;
use crate::fs::info::{is_fat_volume, read_attributes, set_mtime};
use crate::fs::metadata;
use crate::pathutil::{fs_path, fs_path_create_dir, staging_path, staging_path_numbered};

/// Copy chunk size; one buffer per worker thread
pub const COPY_CHUNK_SIZE: usize = 512 * 1024;

const FOUR_GIB: u64 = 4 * 1024 * 1024 * 1024;

thread_local! {
    static COPY_BUFFER: RefCell<Vec<u8>> = RefCell::new(vec![0u8; COPY_CHUNK_SIZE]);
}

/// Observer of one copy operation.
///
/// `on_bytes` fires once per chunk and may raise cancellation, which
/// unwinds the copy and removes the staging file. `on_delete_target` fires
/// exactly once before the commit rename; the implementation owns the
/// policy for the pre-existing target (permanent delete, recycler,
/// versioning move).
pub trait CopyObserver {
    fn on_bytes(&mut self, _total_transferred: u64) -> Result<()> {
        Ok(())
    }

    fn on_delete_target(&mut self, _target: &Path) -> std::result::Result<(), FsError> {
        Ok(())
    }
}

/// Observer that accepts everything, for callers without progress needs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCopyObserver;

impl CopyObserver for NoopCopyObserver {}

/// Options for `copy_file`
#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    pub copy_permissions: bool,
    /// Stage to a temporary sibling and commit by atomic rename. Disable
    /// only for storage that rejects the temporary extension.
    pub transactional: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            copy_permissions: false,
            transactional: true,
        }
    }
}

/// Copy `src` to `dst` with the source mtime.
///
/// On success `dst` holds exactly the source bytes. On any failure or
/// cancellation the target is never left in a partially written state: the
/// transactional path stages to a sibling committed by rename, and the
/// staging file is removed by its guard on unwind.
pub fn copy_file(
    src: &Path,
    dst: &Path,
    options: CopyOptions,
    observer: &mut dyn CopyObserver,
) -> Result<()> {
    if options.transactional {
        copy_file_staged(src, dst, options, observer)
    } else {
        copy_file_direct(src, dst, options, observer)
    }
}

fn copy_file_staged(
    src: &Path,
    dst: &Path,
    options: CopyOptions,
    observer: &mut dyn CopyObserver,
) -> Result<()> {
    let src_attrs = read_attributes(src, true).map_err(SyncError::Fs)?;

    let (staging_file, staging) = create_staging(dst)?;
    let guard = RemoveGuard::file(&staging);

    stream_bytes(src, &staging, staging_file, src_attrs.size, observer)?;
    set_mtime(&staging, src_attrs.mtime, true).map_err(SyncError::Fs)?;

    // the hook owns the fate of the old target; the rename is the commit
    observer.on_delete_target(dst).map_err(SyncError::Fs)?;
    std::fs::rename(fs_path(&staging).as_ref(), fs_path(dst).as_ref())
        .map_err(|err| SyncError::Fs(FsError::from_io(&staging, err)))?;
    guard.dismiss();

    finish_permissions(src, dst, options)
}

fn copy_file_direct(
    src: &Path,
    dst: &Path,
    options: CopyOptions,
    observer: &mut dyn CopyObserver,
) -> Result<()> {
    let src_attrs = read_attributes(src, true).map_err(SyncError::Fs)?;

    observer.on_delete_target(dst).map_err(SyncError::Fs)?;

    let out = File::create(fs_path(dst).as_ref())
        .map_err(|err| SyncError::Fs(FsError::from_io(dst, err)))?;
    let guard = RemoveGuard::file(dst);
    stream_bytes(src, dst, out, src_attrs.size, observer)?;
    set_mtime(dst, src_attrs.mtime, true).map_err(SyncError::Fs)?;
    guard.dismiss();

    finish_permissions(src, dst, options)
}

/// Permission copy happens after the commit; a failure revokes the copy.
fn finish_permissions(src: &Path, dst: &Path, options: CopyOptions) -> Result<()> {
    if !options.copy_permissions {
        return Ok(());
    }
    if let Err(err) = metadata::copy_permissions(src, dst, true) {
        let _ = std::fs::remove_file(dst);
        return Err(SyncError::Fs(err));
    }
    Ok(())
}

fn stream_bytes(
    src: &Path,
    writing_to: &Path,
    mut out: File,
    src_size: u64,
    observer: &mut dyn CopyObserver,
) -> Result<()> {
    let mut reader = File::open(fs_path(src).as_ref())
        .map_err(|err| SyncError::Fs(FsError::from_io(src, err)))?;

    let mut total: u64 = 0;
    COPY_BUFFER.with(|buffer| -> Result<()> {
        let mut buffer = buffer.borrow_mut();
        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|err| SyncError::Fs(FsError::from_io(src, err)))?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])
                .map_err(|err| SyncError::Fs(write_error(writing_to, err, src_size)))?;
            total += read as u64;
            observer.on_bytes(total)?;
        }
        Ok(())
    })?;

    out.sync_all()
        .map_err(|err| SyncError::Fs(FsError::from_io(writing_to, err)))?;
    Ok(())
}

/// A write failure onto a FAT volume with an oversized source deserves a
/// cause in the message: the platform only reports an invalid parameter.
fn write_error(path: &Path, err: std::io::Error, src_size: u64) -> FsError {
    let mut fs_err = FsError::from_io(path, err);
    if src_size > FOUR_GIB && is_fat_volume(path) {
        fs_err
            .message
            .push_str("; FAT volumes cannot store files larger than 4 GiB");
    }
    fs_err
}

/// Open a unique staging sibling of `dst` for exclusive write.
fn create_staging(dst: &Path) -> Result<(File, PathBuf)> {
    let mut candidate = staging_path(dst);
    for n in 1..10_000u32 {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(fs_path(&candidate).as_ref())
        {
            Ok(file) => return Ok((file, candidate)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                candidate = staging_path_numbered(dst, n);
            }
            Err(err) => return Err(SyncError::Fs(FsError::from_io(&candidate, err))),
        }
    }
    Err(SyncError::Fs(FsError::new(
        FsErrorKind::TargetExists,
        staging_path(dst),
        "no free staging name",
    )))
}

/// Create a directory, missing parents included.
///
/// When a template directory is supplied its flags are copied onto the new
/// directory, and its ownership too when `copy_permissions` is set. The
/// returned guard removes the directory again; the caller dismisses it
/// once its whole sequence has succeeded.
pub fn create_dir(
    path: &Path,
    template: Option<&Path>,
    copy_permissions: bool,
) -> std::result::Result<RemoveGuard, FsError> {
    std::fs::create_dir_all(fs_path_create_dir(path).as_ref())
        .map_err(|err| FsError::from_io(path, err))?;
    let guard = RemoveGuard::dir(path);

    if let Some(template) = template {
        metadata::copy_directory_flags(template, path);
        if copy_permissions {
            metadata::copy_ownership(template, path, true)?;
        }
    }
    Ok(guard)
}
