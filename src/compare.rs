/*!
 * Two-sided comparison
 *
 * Scans both roots of a folder pair into raw `DirContainer`s (in parallel,
 * one directory level at a time), merges them by name into a paired tree,
 * and categorizes every pair by the configured variant. The hard filter
 * keeps items out of the containers during traversal; the soft filter
 * deactivates nodes afterwards without removing them.
 */

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{CompareVariant, FolderPairConfig, SymlinkPolicy, SyncConfig};
use crate::database::DB_FILE_NAME;
use crate::error::{FsError, FsErrorKind, Result, SyncError};
use crate::filter::{HardFilter, SoftFilter};
use crate::fs;
use crate::hierarchy::{
    name_key, BaseDirMapping, CompareResult, DirContainer, DirMapping, FileDescriptor, Side,
    SymlinkDescriptor,
};
use crate::lock::{acquire_directory_lock, LOCK_FILE_NAME};
use crate::pathutil::is_staging_name;
use crate::progress::{CancelFlag, ProgressSink};

/// FAT timestamps have 2-second granularity; mtimes within this tolerance
/// count as identical.
pub const MTIME_TOLERANCE_SECS: i64 = 2;

const CONTENT_CHUNK_SIZE: usize = 256 * 1024;

/// Compare every configured folder pair.
pub fn compare_all(
    config: &SyncConfig,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<Vec<BaseDirMapping>> {
    config
        .pairs
        .iter()
        .map(|pair| compare_pair(config, pair, progress, cancel))
        .collect()
}

/// Compare one folder pair into a categorized tree, holding directory
/// locks on both sides. The locks live inside the returned mapping until
/// the sync run completes.
pub fn compare_pair(
    config: &SyncConfig,
    pair: &FolderPairConfig,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<BaseDirMapping> {
    for base in [&pair.left, &pair.right] {
        if fs::exists(base) != fs::PathKind::Dir {
            return Err(SyncError::Fs(FsError::new(
                FsErrorKind::PathNotFound,
                base,
                "base directory does not exist",
            )));
        }
    }

    let lock_left = acquire_directory_lock(&pair.left, progress, cancel)?;
    let lock_right = acquire_directory_lock(&pair.right, progress, cancel)?;

    let filter_config = match &pair.filter {
        Some(overlay) => config.filter.overlay(overlay),
        None => config.filter.clone(),
    };
    let hard = HardFilter::from_config(&filter_config)
        .map_err(|e| SyncError::Config(e.to_string()))?;
    let soft = SoftFilter::from_config(&filter_config);

    if config.detect_moved_files {
        tracing::debug!("move detection degrades to copy+delete without a prior sync database");
    }

    let scanner = Scanner {
        hard: &hard,
        symlinks: config.symlinks,
        scanned: AtomicU64::new(0),
        progress,
        cancel,
    };
    let (left_scan, right_scan) = rayon::join(
        || scanner.scan_root(&pair.left),
        || scanner.scan_root(&pair.right),
    );

    let mut base = BaseDirMapping::new(&pair.left, &pair.right, filter_config);
    base.lock_left = Some(lock_left);
    base.lock_right = Some(lock_right);

    let mut merger = Merger {
        variant: config.compare,
        progress,
        cancel,
        buf_left: vec![0u8; CONTENT_CHUNK_SIZE],
        buf_right: vec![0u8; CONTENT_CHUNK_SIZE],
    };
    merger.merge_level(&mut base.root, left_scan?, right_scan?)?;

    if !soft.is_null() {
        apply_soft_filter(&mut base.root, &soft);
    }

    Ok(base)
}

// ---------------------------------------------------------------------------
// Scan

struct Scanner<'a> {
    hard: &'a HardFilter,
    symlinks: SymlinkPolicy,
    scanned: AtomicU64,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancelFlag,
}

impl Scanner<'_> {
    fn scan_root(&self, base: &Path) -> Result<DirContainer> {
        let mut visited = HashSet::new();
        self.scan_dir(base, Path::new(""), &mut visited)
    }

    /// One directory level; recursion carries the accumulated set of
    /// dereferenced directory targets for cycle detection.
    fn scan_dir(
        &self,
        dir: &Path,
        rel_prefix: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<DirContainer> {
        self.cancel.check()?;

        let mut container = DirContainer::new();
        container.mtime = fs::read_attributes(dir, true)
            .map(|a| a.mtime)
            .unwrap_or(0);

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("cannot enumerate {}: {}", dir.display(), err);
                return Ok(container);
            }
        };

        for entry in entries {
            self.cancel.check()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("unreadable entry under {}: {}", dir.display(), err);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            let rel = rel_prefix.join(&name);

            if is_service_entry(&name) {
                continue;
            }
            if is_staging_name(&name) {
                // leftover from a crashed run on this base
                tracing::info!("removing stale staging file {}", path.display());
                if let Err(err) = fs::remove_file(&path) {
                    tracing::warn!("cannot remove {}: {}", path.display(), err);
                }
                continue;
            }

            match fs::exists(&path) {
                fs::PathKind::Symlink => {
                    self.scan_symlink(&path, &name, &rel, &mut container, visited)?
                }
                fs::PathKind::Dir => {
                    if self.hard.passes_dir(&rel) {
                        let sub = self.scan_dir(&path, &rel, visited)?;
                        container.subdirs.insert(name, sub);
                    }
                }
                fs::PathKind::File => {
                    if self.hard.passes_file(&rel) {
                        match self.file_descriptor(&path) {
                            Ok(desc) => {
                                container.subfiles.insert(name, desc);
                            }
                            Err(err) => tracing::warn!("cannot stat {}: {}", path.display(), err),
                        }
                    }
                }
                fs::PathKind::Missing => {}
            }
            self.bump_scanned();
        }

        Ok(container)
    }

    fn scan_symlink(
        &self,
        path: &Path,
        name: &str,
        rel: &Path,
        container: &mut DirContainer,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        match self.symlinks {
            SymlinkPolicy::Ignore => Ok(()),
            SymlinkPolicy::UseDirectly => {
                if self.hard.passes_file(rel) {
                    let mtime = fs::read_attributes(path, false).map(|a| a.mtime).unwrap_or(0);
                    let target = fs::get_symlink_target_text(path).unwrap_or_default();
                    let kind = fs::symlink_kind(path);
                    container
                        .sublinks
                        .insert(name.to_string(), SymlinkDescriptor::new(mtime, target, kind));
                }
                Ok(())
            }
            SymlinkPolicy::Follow => {
                // report the target's type; a broken link has nothing to offer
                match std::fs::metadata(path) {
                    Ok(meta) if meta.is_dir() => {
                        if !self.hard.passes_dir(rel) {
                            return Ok(());
                        }
                        let resolved =
                            std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                        if !visited.insert(resolved.clone()) {
                            // cycle: revisited target counts as empty
                            container.subdirs.insert(name.to_string(), DirContainer::new());
                            return Ok(());
                        }
                        let sub = self.scan_dir(path, rel, visited)?;
                        visited.remove(&resolved);
                        container.subdirs.insert(name.to_string(), sub);
                        Ok(())
                    }
                    Ok(meta) => {
                        if self.hard.passes_file(rel) {
                            let mtime = fs::read_attributes(path, true)
                                .map(|a| a.mtime)
                                .unwrap_or(0);
                            container.subfiles.insert(
                                name.to_string(),
                                FileDescriptor::new(meta.len(), mtime),
                            );
                        }
                        Ok(())
                    }
                    Err(err) => {
                        tracing::warn!("broken symlink {} skipped: {}", path.display(), err);
                        Ok(())
                    }
                }
            }
        }
    }

    fn file_descriptor(&self, path: &Path) -> std::result::Result<FileDescriptor, FsError> {
        let attrs = fs::read_attributes(path, false)?;
        Ok(FileDescriptor {
            size: attrs.size,
            mtime: attrs.mtime,
            file_id: fs::stable_file_id(path),
        })
    }

    fn bump_scanned(&self) {
        let count = self.scanned.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress.on_file_scanned(count);
    }
}

/// Lock and database files never take part in a sync.
fn is_service_entry(name: &str) -> bool {
    name == LOCK_FILE_NAME
        || name == DB_FILE_NAME
        || (name.starts_with("Del.") && name.ends_with(LOCK_FILE_NAME))
}

// ---------------------------------------------------------------------------
// Merge and categorize

enum ScanEntry {
    Dir(DirContainer),
    File(FileDescriptor),
    Link(SymlinkDescriptor),
}

impl ScanEntry {
    fn kind_name(&self) -> &'static str {
        match self {
            ScanEntry::Dir(_) => "directory",
            ScanEntry::File(_) => "file",
            ScanEntry::Link(_) => "symlink",
        }
    }
}

fn drain_container(container: DirContainer) -> HashMap<String, (String, ScanEntry)> {
    let mut out = HashMap::new();
    for (name, sub) in container.subdirs {
        out.insert(name_key(&name), (name, ScanEntry::Dir(sub)));
    }
    for (name, desc) in container.subfiles {
        out.insert(name_key(&name), (name, ScanEntry::File(desc)));
    }
    for (name, desc) in container.sublinks {
        out.insert(name_key(&name), (name, ScanEntry::Link(desc)));
    }
    out
}

struct Merger<'a> {
    variant: CompareVariant,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancelFlag,
    buf_left: Vec<u8>,
    buf_right: Vec<u8>,
}

impl Merger<'_> {
    fn merge_level(
        &mut self,
        node: &mut DirMapping,
        left: DirContainer,
        right: DirContainer,
    ) -> Result<()> {
        let left_entries = drain_container(left);
        let mut right_entries = drain_container(right);

        // deterministic child order regardless of readdir order
        let mut pairs: BTreeMap<String, (String, Option<ScanEntry>, Option<ScanEntry>)> =
            BTreeMap::new();
        for (key, (name, entry)) in left_entries {
            let right_entry = right_entries.remove(&key).map(|(_, e)| e);
            pairs.insert(key, (name, Some(entry), right_entry));
        }
        for (key, (name, entry)) in right_entries {
            pairs.insert(key, (name, None, Some(entry)));
        }

        for (_, (name, left_entry, right_entry)) in pairs {
            self.cancel.check()?;
            match (left_entry, right_entry) {
                (Some(ScanEntry::Dir(l)), Some(ScanEntry::Dir(r))) => {
                    let mtime_delta = (l.mtime - r.mtime).abs();
                    let child = node.add_subdir(true, name, true);
                    if mtime_delta > MTIME_TOLERANCE_SECS {
                        child.state.compare_result = CompareResult::DifferentMetadataOnly;
                    }
                    self.merge_level(child, l, r)?;
                }
                (Some(ScanEntry::File(l)), Some(ScanEntry::File(r))) => {
                    let (left_path, right_path) = node.child_paths(&name);
                    let category = self.categorize_files(&l, &r, &left_path, &right_path)?;
                    node.add_subfile(l, name, r, category);
                }
                (Some(ScanEntry::Link(l)), Some(ScanEntry::Link(r))) => {
                    let category = categorize_links(self.variant, &l, &r);
                    let link = node.add_sublink(l, name, r, category);
                    if category == CompareResult::Conflict {
                        link.state
                            .set_conflict("symlink target could not be read on one side");
                    }
                }
                (Some(entry), None) => self.insert_one_sided(node, Side::Left, name, entry),
                (None, Some(entry)) => self.insert_one_sided(node, Side::Right, name, entry),
                (Some(l), Some(r)) => {
                    // kinds disagree: manual resolution required
                    let description = format!(
                        "items have different types: {} on the left, {} on the right",
                        l.kind_name(),
                        r.kind_name()
                    );
                    let left_desc = match l {
                        ScanEntry::File(d) => d,
                        _ => FileDescriptor::sentinel(),
                    };
                    let right_desc = match r {
                        ScanEntry::File(d) => d,
                        _ => FileDescriptor::sentinel(),
                    };
                    let file =
                        node.add_subfile(left_desc, name, right_desc, CompareResult::Equal);
                    file.state.set_conflict(description);
                }
                (None, None) => unreachable!(),
            }
        }
        Ok(())
    }

    fn insert_one_sided(&mut self, node: &mut DirMapping, side: Side, name: String, entry: ScanEntry) {
        match entry {
            ScanEntry::File(desc) => {
                node.add_subfile_one_sided(side, desc, name);
            }
            ScanEntry::Link(desc) => {
                node.add_sublink_one_sided(side, desc, name);
            }
            ScanEntry::Dir(container) => {
                let (left, right) = match side {
                    Side::Left => (true, false),
                    Side::Right => (false, true),
                };
                let child = node.add_subdir(left, name, right);
                populate_one_sided(child, side, container);
            }
        }
    }

    fn categorize_files(
        &mut self,
        left: &FileDescriptor,
        right: &FileDescriptor,
        left_path: &Path,
        right_path: &Path,
    ) -> Result<CompareResult> {
        match self.variant {
            CompareVariant::ByTimeSize => Ok(categorize_by_time_size(
                left,
                right,
                left_path,
                right_path,
            )),
            CompareVariant::ByContent => {
                if left.size != right.size {
                    return Ok(CompareResult::DifferentContent);
                }
                if left.size == 0 {
                    return Ok(CompareResult::Equal);
                }
                if self.contents_equal(left_path, right_path)? {
                    Ok(CompareResult::Equal)
                } else {
                    Ok(CompareResult::DifferentContent)
                }
            }
        }
    }

    /// Streaming equality of two equally sized files, chunk by chunk.
    fn contents_equal(&mut self, left_path: &Path, right_path: &Path) -> Result<bool> {
        let mut left = File::open(left_path)
            .map_err(|err| SyncError::Fs(FsError::from_io(left_path, err)))?;
        let mut right = File::open(right_path)
            .map_err(|err| SyncError::Fs(FsError::from_io(right_path, err)))?;

        loop {
            self.cancel.check()?;
            let n_left = read_full(&mut left, &mut self.buf_left)
                .map_err(|err| SyncError::Fs(FsError::from_io(left_path, err)))?;
            let n_right = read_full(&mut right, &mut self.buf_right)
                .map_err(|err| SyncError::Fs(FsError::from_io(right_path, err)))?;

            if n_left != n_right {
                return Ok(false);
            }
            if n_left == 0 {
                return Ok(true);
            }
            if self.buf_left[..n_left] != self.buf_right[..n_right] {
                return Ok(false);
            }
            self.progress.on_bytes_compared(n_left as u64);
        }
    }
}

/// Fill the buffer as far as the stream allows.
fn read_full(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn categorize_by_time_size(
    left: &FileDescriptor,
    right: &FileDescriptor,
    left_path: &Path,
    right_path: &Path,
) -> CompareResult {
    let delta = left.mtime - right.mtime;

    if left.size == right.size {
        if delta.abs() <= MTIME_TOLERANCE_SECS {
            return CompareResult::Equal;
        }
        // an exact one-hour offset on a FAT volume is a DST artifact
        if (delta.abs() - 3600).abs() <= MTIME_TOLERANCE_SECS
            && (fs::is_fat_volume(left_path) || fs::is_fat_volume(right_path))
        {
            return CompareResult::Equal;
        }
        if delta > 0 {
            CompareResult::LeftNewer
        } else {
            CompareResult::RightNewer
        }
    } else {
        CompareResult::DifferentContent
    }
}

fn categorize_links(
    variant: CompareVariant,
    left: &SymlinkDescriptor,
    right: &SymlinkDescriptor,
) -> CompareResult {
    if left.target.is_empty() || right.target.is_empty() {
        return CompareResult::Conflict;
    }
    if left.target != right.target || left.kind != right.kind {
        return CompareResult::DifferentContent;
    }
    match variant {
        CompareVariant::ByContent => CompareResult::Equal,
        CompareVariant::ByTimeSize => {
            let delta = left.mtime - right.mtime;
            if delta.abs() <= MTIME_TOLERANCE_SECS {
                CompareResult::Equal
            } else if delta > 0 {
                CompareResult::LeftNewer
            } else {
                CompareResult::RightNewer
            }
        }
    }
}

/// Recursively mirror a one-sided container into the tree, so every
/// descendant of a one-sided directory carries the same category.
fn populate_one_sided(node: &mut DirMapping, side: Side, container: DirContainer) {
    let mut names: Vec<_> = container.subfiles.into_iter().collect();
    names.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, desc) in names {
        node.add_subfile_one_sided(side, desc, name);
    }

    let mut links: Vec<_> = container.sublinks.into_iter().collect();
    links.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, desc) in links {
        node.add_sublink_one_sided(side, desc, name);
    }

    let mut dirs: Vec<_> = container.subdirs.into_iter().collect();
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, sub) in dirs {
        let (left, right) = match side {
            Side::Left => (true, false),
            Side::Right => (false, true),
        };
        let child = node.add_subdir(left, name, right);
        populate_one_sided(child, side, sub);
    }
}

/// Deactivate files outside the soft-filter window; they stay in the tree
/// for display but the executor skips them.
fn apply_soft_filter(node: &mut DirMapping, soft: &SoftFilter) {
    for file in &mut node.subfiles {
        let matches_left =
            file.state.left_present && soft.matches_file(file.left.size, file.left.mtime);
        let matches_right =
            file.state.right_present && soft.matches_file(file.right.size, file.right.mtime);
        file.state.active = matches_left || matches_right;
    }
    for dir in &mut node.subdirs {
        apply_soft_filter(dir, soft);
    }
}
