/*!
 * Portable filesystem primitives
 *
 * Synchronous building blocks implementing exactly the semantics the
 * executor needs: probing, attribute handling, crash-safe copy, removal
 * with per-entry progress, and cross-volume move fallback. Every operation
 * reports a structured `FsError`; partial mutations are protected by scope
 * guards dismissed only on success.
 */

pub mod copy;
pub mod guard;
pub mod info;
pub mod metadata;
pub mod remove;
pub mod rename;
pub mod symlink;

pub use copy::{copy_file, create_dir, CopyObserver, CopyOptions, NoopCopyObserver, COPY_CHUNK_SIZE};
pub use guard::RemoveGuard;
pub use info::{
    exists, fat_decode_utc_time, fat_encode_utc_time, fat_has_utc_encoded, is_fat_volume,
    read_attributes, same_volume, set_mtime, stable_file_id, Attributes, PathKind, VolumeMatch,
};
pub use metadata::{copy_directory_flags, copy_mode, copy_ownership, copy_permissions};
pub use remove::{remove_dir, remove_file};
pub use rename::{move_dir, move_file, rename};
pub use symlink::{copy_symlink, create_symlink, get_symlink_target_text, symlink_kind};
