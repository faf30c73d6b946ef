/*!
 * Plan execution
 *
 * Walks the resolved tree in three passes whose order carries the
 * correctness burden: directory creations first (parents before children),
 * then file and symlink payloads, then deletions (children before
 * parents). Every item runs inside a retry loop driven by the error sink,
 * and every successful primitive is mirrored back into the tree so that
 * statistics and database writes reflect reality even on partial runs.
 */

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{DeletionPolicy, DirectionPolicy, SyncConfig, VersioningStyle};
use crate::database::SyncDatabase;
use crate::error::{FsError, FsErrorKind, Result, SyncError};
use crate::fs;
use crate::fs::{CopyObserver, CopyOptions, NoopCopyObserver};
use crate::hierarchy::{
    BaseDirMapping, CompareResult, DirMapping, FileMapping, Side, SymlinkMapping, SyncOperation,
};
use crate::progress::{CancelFlag, ErrorDecision, ErrorSink, ProgressSink};
use crate::resolve::map_operation;
use crate::stats::{RunSummary, SyncStatistics};

/// External collaborator moving entries to the platform recycle bin.
pub trait Recycler: Send {
    fn recycle(&self, path: &Path) -> std::result::Result<(), FsError>;
}

/// Stand-in when no recycler is wired up; selecting the recycle policy
/// without one is a configuration-level mistake surfaced per item.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecycler;

impl Recycler for NoRecycler {
    fn recycle(&self, path: &Path) -> std::result::Result<(), FsError> {
        Err(FsError::new(
            FsErrorKind::AttributeUnsupported,
            path,
            "no recycler collaborator configured",
        ))
    }
}

/// Compute the work a resolved tree implies, for the pre-pass publication
/// and for dry runs.
pub fn compute_statistics(bases: &[BaseDirMapping]) -> SyncStatistics {
    let mut stats = SyncStatistics::default();
    for base in bases {
        collect_statistics(&base.root, &mut stats);
    }
    stats
}

fn collect_statistics(node: &DirMapping, stats: &mut SyncStatistics) {
    for file in &node.subfiles {
        let op = map_operation(
            file.state.compare_result,
            file.state.direction,
            file.state.active,
        );
        let payload = match op.target_side() {
            Some(Side::Right) => file.left.size,
            Some(Side::Left) => file.right.size,
            None => 0,
        };
        tally(op, stats, payload);
    }
    for link in &node.sublinks {
        let op = map_operation(
            link.state.compare_result,
            link.state.direction,
            link.state.active,
        );
        tally(op, stats, 0);
    }
    for dir in &node.subdirs {
        let op = map_operation(
            dir.state.compare_result,
            dir.state.direction,
            dir.state.active,
        );
        tally(op, stats, 0);
        collect_statistics(dir, stats);
    }
}

fn tally(op: SyncOperation, stats: &mut SyncStatistics, payload: u64) {
    match op {
        SyncOperation::CreateLeft => {
            stats.create_left += 1;
            stats.bytes_to_copy += payload;
        }
        SyncOperation::CreateRight => {
            stats.create_right += 1;
            stats.bytes_to_copy += payload;
        }
        SyncOperation::OverwriteLeft => {
            stats.overwrite_left += 1;
            stats.bytes_to_copy += payload;
        }
        SyncOperation::OverwriteRight => {
            stats.overwrite_right += 1;
            stats.bytes_to_copy += payload;
        }
        SyncOperation::DeleteLeft => stats.delete_left += 1,
        SyncOperation::DeleteRight => stats.delete_right += 1,
        SyncOperation::CopyMetadataToLeft => stats.metadata_left += 1,
        SyncOperation::CopyMetadataToRight => stats.metadata_right += 1,
        SyncOperation::UnresolvedConflict => stats.conflicts += 1,
        SyncOperation::DoNothing | SyncOperation::Equal => {}
    }
}

/// Execute the resolved plan over all pairs.
pub fn execute(
    bases: &mut [BaseDirMapping],
    config: &SyncConfig,
    progress: &dyn ProgressSink,
    errors: &mut dyn ErrorSink,
    cancel: &CancelFlag,
    recycler: &dyn Recycler,
) -> Result<RunSummary> {
    let started = Instant::now();
    let stats = compute_statistics(bases);
    progress.on_plan_ready(&stats);

    let mut executor = Executor {
        config,
        progress,
        errors,
        cancel,
        recycler,
        summary: RunSummary::default(),
    };

    let mut outcome = Ok(());
    for base in bases.iter_mut() {
        outcome = executor.run_base(base);
        if outcome.is_err() {
            break;
        }
    }

    // the database must reflect whatever really happened, even when the
    // run was cancelled or aborted halfway
    if matches!(config.direction, DirectionPolicy::Automatic) {
        for base in bases.iter_mut() {
            base.prune_empty();
            let db = SyncDatabase::from_tree(&base.root);
            if let Err(err) = db.save(base.base_left()) {
                executor
                    .errors
                    .on_warning(&format!("cannot write sync database: {}", err));
            }
        }
    }

    let mut summary = executor.summary;
    summary.duration = started.elapsed();
    progress.on_run_finished(&summary);

    outcome.map(|_| summary)
}

enum ItemOutcome {
    Done,
    Failed,
}

struct Executor<'a> {
    config: &'a SyncConfig,
    progress: &'a dyn ProgressSink,
    errors: &'a mut dyn ErrorSink,
    cancel: &'a CancelFlag,
    recycler: &'a dyn Recycler,
    summary: RunSummary,
}

impl Executor<'_> {
    fn run_base(&mut self, base: &mut BaseDirMapping) -> Result<()> {
        self.pass_create_dirs(&mut base.root)?;
        self.pass_payloads(&mut base.root)?;
        self.pass_deletions(&mut base.root)?;
        base.prune_empty();
        Ok(())
    }

    // pass 1: directory creations, parents before children by pre-order
    fn pass_create_dirs(&mut self, node: &mut DirMapping) -> Result<()> {
        for dir in &mut node.subdirs {
            let op = map_operation(dir.state.compare_result, dir.state.direction, dir.state.active);
            match op {
                SyncOperation::CreateLeft => self.create_dir_on(dir, Side::Left)?,
                SyncOperation::CreateRight => self.create_dir_on(dir, Side::Right)?,
                _ => {}
            }
            self.pass_create_dirs(dir)?;
        }
        Ok(())
    }

    // pass 2: file/symlink payloads and metadata-only updates
    fn pass_payloads(&mut self, node: &mut DirMapping) -> Result<()> {
        for file in &mut node.subfiles {
            self.exec_file(file)?;
        }
        for link in &mut node.sublinks {
            self.exec_link(link)?;
        }
        for dir in &mut node.subdirs {
            let op = map_operation(dir.state.compare_result, dir.state.direction, dir.state.active);
            match op {
                SyncOperation::CopyMetadataToLeft => self.copy_dir_metadata(dir, Side::Left)?,
                SyncOperation::CopyMetadataToRight => self.copy_dir_metadata(dir, Side::Right)?,
                _ => {}
            }
            self.pass_payloads(dir)?;
        }
        Ok(())
    }

    // pass 3: deletions, children before parents; a delete-marked
    // directory takes its whole remaining subtree down at once
    fn pass_deletions(&mut self, node: &mut DirMapping) -> Result<()> {
        for dir in &mut node.subdirs {
            let op = map_operation(dir.state.compare_result, dir.state.direction, dir.state.active);
            match op {
                SyncOperation::DeleteLeft => self.delete_dir_on(dir, Side::Left)?,
                SyncOperation::DeleteRight => self.delete_dir_on(dir, Side::Right)?,
                _ => self.pass_deletions(dir)?,
            }
        }
        for file in &mut node.subfiles {
            let op = map_operation(file.state.compare_result, file.state.direction, file.state.active);
            match op {
                SyncOperation::DeleteLeft => self.delete_file_on(file, Side::Left)?,
                SyncOperation::DeleteRight => self.delete_file_on(file, Side::Right)?,
                _ => {}
            }
        }
        for link in &mut node.sublinks {
            let op = map_operation(link.state.compare_result, link.state.direction, link.state.active);
            match op {
                SyncOperation::DeleteLeft => self.delete_link_on(link, Side::Left)?,
                SyncOperation::DeleteRight => self.delete_link_on(link, Side::Right)?,
                _ => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // per-item procedures

    fn exec_file(&mut self, file: &mut FileMapping) -> Result<()> {
        let op = map_operation(file.state.compare_result, file.state.direction, file.state.active);
        match op {
            SyncOperation::CreateLeft | SyncOperation::OverwriteLeft => {
                self.copy_file_to(file, Side::Left, op)
            }
            SyncOperation::CreateRight | SyncOperation::OverwriteRight => {
                self.copy_file_to(file, Side::Right, op)
            }
            SyncOperation::CopyMetadataToLeft => self.copy_file_metadata(file, Side::Left),
            SyncOperation::CopyMetadataToRight => self.copy_file_metadata(file, Side::Right),
            SyncOperation::UnresolvedConflict => {
                self.report_conflict(&file.state.path_on(Side::Left), &file.state);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn copy_file_to(&mut self, file: &mut FileMapping, target: Side, op: SyncOperation) -> Result<()> {
        let source = target.opposite();
        let src = file.state.path_on(source);
        let dst = file.state.path_on(target);

        // a kind conflict forced into a direction is only executable when
        // both on-disk entries really are files
        if file.state.compare_result == CompareResult::Conflict {
            let src_ok = fs::exists(&src) == fs::PathKind::File;
            let dst_ok = matches!(fs::exists(&dst), fs::PathKind::File | fs::PathKind::Missing);
            if !src_ok || !dst_ok {
                self.report_conflict(&dst, &file.state);
                return Ok(());
            }
        }

        self.progress.on_item_started(&dst, op);

        let options = CopyOptions {
            copy_permissions: self.config.copy_permissions,
            transactional: self.config.transactional_copy,
        };
        let rel = file.state.rel_path();
        let progress = self.progress;
        let cancel = self.cancel;
        let policy = &self.config.deletion;
        let recycler = self.recycler;

        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            let mut observer = ItemObserver {
                progress,
                cancel,
                policy,
                recycler,
                rel: &rel,
                last_total: 0,
            };
            fs::copy_file(&src, &dst, options, &mut observer)
        })?;

        match outcome {
            ItemOutcome::Done => {
                self.summary.bytes_copied += file.descriptor_on(source).size;
                self.finish_item(|| file.synchronize_sides());
            }
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn copy_file_metadata(&mut self, file: &mut FileMapping, target: Side) -> Result<()> {
        let source = target.opposite();
        let src = file.state.path_on(source);
        let dst = file.state.path_on(target);
        let mtime = file.descriptor_on(source).mtime;
        self.progress
            .on_item_started(&dst, map_operation(file.state.compare_result, file.state.direction, true));

        let copy_permissions = self.config.copy_permissions;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            fs::set_mtime(&dst, mtime, true).map_err(SyncError::Fs)?;
            if copy_permissions {
                fs::copy_permissions(&src, &dst, true).map_err(SyncError::Fs)?;
            }
            Ok(())
        })?;

        match outcome {
            ItemOutcome::Done => self.finish_item(|| file.synchronize_sides()),
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn delete_file_on(&mut self, file: &mut FileMapping, side: Side) -> Result<()> {
        let path = file.state.path_on(side);
        self.progress.on_item_started(
            &path,
            map_operation(file.state.compare_result, file.state.direction, true),
        );

        let rel = file.state.rel_path();
        let policy = &self.config.deletion;
        let recycler = self.recycler;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            dispose_entry(policy, recycler, &path, &rel).map_err(SyncError::Fs)
        })?;

        match outcome {
            ItemOutcome::Done => self.finish_item(|| file.synchronize_sides()),
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn exec_link(&mut self, link: &mut SymlinkMapping) -> Result<()> {
        let op = map_operation(link.state.compare_result, link.state.direction, link.state.active);
        let target = match op {
            SyncOperation::CreateLeft | SyncOperation::OverwriteLeft => Side::Left,
            SyncOperation::CreateRight | SyncOperation::OverwriteRight => Side::Right,
            SyncOperation::CopyMetadataToLeft => {
                return self.copy_link_metadata(link, Side::Left)
            }
            SyncOperation::CopyMetadataToRight => {
                return self.copy_link_metadata(link, Side::Right)
            }
            SyncOperation::UnresolvedConflict => {
                self.report_conflict(&link.state.path_on(Side::Left), &link.state);
                return Ok(());
            }
            _ => return Ok(()),
        };

        let source = target.opposite();
        let src = link.state.path_on(source);
        let dst = link.state.path_on(target);
        self.progress.on_item_started(&dst, op);

        let rel = link.state.rel_path();
        let copy_permissions = self.config.copy_permissions;
        let policy = &self.config.deletion;
        let recycler = self.recycler;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            // replace, not append: the old link is disposed of first
            dispose_entry(policy, recycler, &dst, &rel).map_err(SyncError::Fs)?;
            fs::copy_symlink(&src, &dst, copy_permissions).map_err(SyncError::Fs)
        })?;

        match outcome {
            ItemOutcome::Done => self.finish_item(|| link.synchronize_sides()),
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn copy_link_metadata(&mut self, link: &mut SymlinkMapping, target: Side) -> Result<()> {
        let source = target.opposite();
        let dst = link.state.path_on(target);
        let mtime = link.descriptor_on(source).mtime;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            fs::set_mtime(&dst, mtime, false).map_err(SyncError::Fs)
        })?;
        match outcome {
            ItemOutcome::Done => self.finish_item(|| link.synchronize_sides()),
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn delete_link_on(&mut self, link: &mut SymlinkMapping, side: Side) -> Result<()> {
        let path = link.state.path_on(side);
        self.progress.on_item_started(
            &path,
            map_operation(link.state.compare_result, link.state.direction, true),
        );

        let rel = link.state.rel_path();
        let policy = &self.config.deletion;
        let recycler = self.recycler;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            dispose_entry(policy, recycler, &path, &rel).map_err(SyncError::Fs)
        })?;

        match outcome {
            ItemOutcome::Done => self.finish_item(|| link.synchronize_sides()),
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn create_dir_on(&mut self, dir: &mut DirMapping, target: Side) -> Result<()> {
        let source = target.opposite();
        let template = dir.state.path_on(source);
        let dst = dir.state.path_on(target);
        self.progress.on_item_started(
            &dst,
            map_operation(dir.state.compare_result, dir.state.direction, true),
        );

        let copy_permissions = self.config.copy_permissions;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            let guard = fs::create_dir(&dst, Some(&template), copy_permissions)
                .map_err(SyncError::Fs)?;
            guard.dismiss();
            Ok(())
        })?;

        match outcome {
            ItemOutcome::Done => self.finish_item(|| dir.synchronize_sides()),
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn copy_dir_metadata(&mut self, dir: &mut DirMapping, target: Side) -> Result<()> {
        let source = target.opposite();
        let src = dir.state.path_on(source);
        let dst = dir.state.path_on(target);

        let copy_permissions = self.config.copy_permissions;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            let attrs = fs::read_attributes(&src, true).map_err(SyncError::Fs)?;
            fs::set_mtime(&dst, attrs.mtime, true).map_err(SyncError::Fs)?;
            if copy_permissions {
                fs::copy_permissions(&src, &dst, true).map_err(SyncError::Fs)?;
            }
            Ok(())
        })?;

        match outcome {
            ItemOutcome::Done => self.finish_item(|| dir.synchronize_sides()),
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn delete_dir_on(&mut self, dir: &mut DirMapping, side: Side) -> Result<()> {
        let path = dir.state.path_on(side);
        self.progress.on_item_started(
            &path,
            map_operation(dir.state.compare_result, dir.state.direction, true),
        );

        let rel = dir.state.rel_path();
        let policy = &self.config.deletion;
        let recycler = self.recycler;
        let outcome = with_retries(self.config, self.cancel, &mut *self.errors, &mut || {
            dispose_entry(policy, recycler, &path, &rel).map_err(SyncError::Fs)
        })?;

        match outcome {
            ItemOutcome::Done => {
                let items = subtree_item_count(dir);
                dir.remove_on_side(side);
                self.summary.items_completed += items;
            }
            ItemOutcome::Failed => self.summary.items_failed += 1,
        }
        Ok(())
    }

    fn finish_item(&mut self, update_model: impl FnOnce()) {
        update_model();
        self.summary.items_completed += 1;
    }

    fn report_conflict(&mut self, path: &Path, state: &crate::hierarchy::PairState) {
        let description = state
            .conflict_description
            .as_deref()
            .unwrap_or("conflicting change");
        self.errors.on_warning(&format!(
            "unresolved conflict on {}: {}",
            path.display(),
            description
        ));
        self.summary.conflicts_unresolved += 1;
    }
}

/// Nodes a whole-subtree deletion takes care of at once.
fn subtree_item_count(dir: &DirMapping) -> u64 {
    1 + dir.subfiles.len() as u64
        + dir.sublinks.len() as u64
        + dir.subdirs.iter().map(subtree_item_count).sum::<u64>()
}

/// Retry loop around one item.
///
/// Filesystem errors go to the sink; Retry sleeps and re-attempts up to
/// the configured count, Ignore gives the item up, Abort unwinds the run.
/// Cancellation and Abort pass straight through, they are never offered to
/// the sink.
fn with_retries(
    config: &SyncConfig,
    cancel: &CancelFlag,
    errors: &mut dyn ErrorSink,
    attempt: &mut dyn FnMut() -> Result<()>,
) -> Result<ItemOutcome> {
    let mut retries_left = config.retry_count;
    loop {
        cancel.check()?;
        match attempt() {
            Ok(()) => return Ok(ItemOutcome::Done),
            Err(SyncError::Fs(err)) => {
                let decision = errors.on_error(err.kind, &err.to_string(), err.is_retriable());
                match decision {
                    ErrorDecision::Retry if retries_left > 0 => {
                        retries_left -= 1;
                        sleep_cancellable(
                            Duration::from_secs(u64::from(config.retry_delay_secs)),
                            cancel,
                        )?;
                    }
                    ErrorDecision::Retry => {
                        errors.on_warning(&format!("giving up after retries: {}", err));
                        return Ok(ItemOutcome::Failed);
                    }
                    ErrorDecision::Ignore => return Ok(ItemOutcome::Failed),
                    ErrorDecision::Abort => return Err(SyncError::Aborted),
                }
            }
            Err(other) => return Err(other),
        }
    }
}

fn sleep_cancellable(total: Duration, cancel: &CancelFlag) -> Result<()> {
    let step = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        cancel.check()?;
        std::thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
    }
    Ok(())
}

/// Copy observer wiring byte progress, cancellation and the pre-delete
/// policy hook for one item.
struct ItemObserver<'a> {
    progress: &'a dyn ProgressSink,
    cancel: &'a CancelFlag,
    policy: &'a DeletionPolicy,
    recycler: &'a dyn Recycler,
    rel: &'a Path,
    last_total: u64,
}

impl CopyObserver for ItemObserver<'_> {
    fn on_bytes(&mut self, total_transferred: u64) -> Result<()> {
        self.cancel.check()?;
        self.progress
            .on_bytes_copied(total_transferred - self.last_total);
        self.last_total = total_transferred;
        Ok(())
    }

    fn on_delete_target(&mut self, target: &Path) -> std::result::Result<(), FsError> {
        dispose_entry(self.policy, self.recycler, target, self.rel)
    }
}

/// Apply the deletion policy to one entry. A missing target is fine (the
/// user beat us to it).
fn dispose_entry(
    policy: &DeletionPolicy,
    recycler: &dyn Recycler,
    target: &Path,
    rel: &Path,
) -> std::result::Result<(), FsError> {
    let kind = fs::exists(target);
    if kind == fs::PathKind::Missing {
        return Ok(());
    }
    match policy {
        DeletionPolicy::Permanent => match kind {
            fs::PathKind::Dir => fs::remove_dir(target, &mut |_| {}),
            _ => fs::remove_file(target).map(|_| ()),
        },
        DeletionPolicy::Recycle => recycler.recycle(target),
        DeletionPolicy::Versioning { path, style } => {
            version_entry(path, *style, target, rel, kind)
        }
    }
}

/// Move an entry into the versioning directory, preserving its relative
/// path. The directory itself is created lazily on first use.
fn version_entry(
    versioning_dir: &Path,
    style: VersioningStyle,
    target: &Path,
    rel: &Path,
    kind: fs::PathKind,
) -> std::result::Result<(), FsError> {
    let mut dest = versioning_dir.join(rel);
    if style == VersioningStyle::TimeStamp {
        dest = timestamped(&dest);
    }

    if fs::same_volume(target, versioning_dir) == fs::VolumeMatch::Different {
        tracing::debug!(
            "versioning {} across volumes, falling back to copy+delete",
            target.display()
        );
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|err| FsError::from_io(parent, err))?;
    }

    if style == VersioningStyle::Replace && fs::exists(&dest) != fs::PathKind::Missing {
        match fs::exists(&dest) {
            fs::PathKind::Dir => fs::remove_dir(&dest, &mut |_| {})?,
            _ => {
                fs::remove_file(&dest)?;
            }
        }
    }

    let moved = match kind {
        fs::PathKind::Dir => fs::move_dir(target, &dest, &mut NoopCopyObserver),
        fs::PathKind::Symlink => match fs::rename(target, &dest) {
            Ok(()) => Ok(()),
            // the link itself must survive, never its referent's bytes
            Err(err) if err.kind == FsErrorKind::DifferentVolume => {
                fs::copy_symlink(target, &dest, false)
                    .and_then(|_| fs::remove_file(target).map(|_| ()))
                    .map_err(SyncError::Fs)
            }
            Err(err) => Err(SyncError::Fs(err)),
        },
        _ => fs::move_file(target, &dest, &mut NoopCopyObserver),
    };
    moved.map_err(|err| match err {
        SyncError::Fs(fs_err) => fs_err,
        other => FsError::new(FsErrorKind::Io, target, other.to_string()),
    })
}

/// `name.ext` becomes `name.ext 2026-08-01 142530`.
fn timestamped(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H%M%S");
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(" {}", stamp));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare_pair;
    use crate::config::{ErrorPolicy, FolderPairConfig};
    use crate::progress::{EventPublisher, NoopProgress, PolicyErrorSink};
    use crate::resolve::resolve_pair;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let left = dir.path().join("left");
        let right = dir.path().join("right");
        std::fs::create_dir(&left).unwrap();
        std::fs::create_dir(&right).unwrap();
        (dir, left, right)
    }

    fn sync_once(config: &SyncConfig, left: &Path, right: &Path) -> RunSummary {
        let pair = FolderPairConfig {
            left: left.to_path_buf(),
            right: right.to_path_buf(),
            filter: None,
        };
        let cancel = CancelFlag::new();
        let mut base = compare_pair(config, &pair, &NoopProgress, &cancel).unwrap();
        resolve_pair(&mut base, config).unwrap();
        let mut bases = [base];
        let mut errors = PolicyErrorSink::new(ErrorPolicy::Ignore, EventPublisher::noop());
        execute(
            &mut bases,
            config,
            &NoopProgress,
            &mut errors,
            &cancel,
            &NoRecycler,
        )
        .unwrap()
    }

    #[test]
    fn test_basic_mirror() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(left.join("subdir")).unwrap();
        std::fs::write(left.join("subdir/b.txt"), b"world").unwrap();

        let summary = sync_once(&SyncConfig::default(), &left, &right);

        assert_eq!(std::fs::read(right.join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(right.join("subdir/b.txt")).unwrap(), b"world");
        assert_eq!(summary.items_completed, 3);
        assert_eq!(summary.bytes_copied, 10);
        assert!(summary.is_clean());

        // mtimes travel with the payload
        let src_mtime = fs::read_attributes(&left.join("a.txt"), true).unwrap().mtime;
        let dst_mtime = fs::read_attributes(&right.join("a.txt"), true)
            .unwrap()
            .mtime;
        assert!((src_mtime - dst_mtime).abs() <= 2);
    }

    #[test]
    fn test_mirror_deletes_right_extras() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("keep.txt"), b"k").unwrap();
        std::fs::write(right.join("extra.txt"), b"x").unwrap();
        std::fs::create_dir_all(right.join("old/deep")).unwrap();
        std::fs::write(right.join("old/deep/file"), b"y").unwrap();

        sync_once(&SyncConfig::default(), &left, &right);

        assert!(right.join("keep.txt").exists());
        assert!(!right.join("extra.txt").exists());
        assert!(!right.join("old").exists());
    }

    #[test]
    fn test_overwrite_newer() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("f.txt"), b"new contents").unwrap();
        std::fs::write(right.join("f.txt"), b"old").unwrap();
        fs::set_mtime(&left.join("f.txt"), 2_000_000, true).unwrap();
        fs::set_mtime(&right.join("f.txt"), 1_000_000, true).unwrap();

        sync_once(&SyncConfig::default(), &left, &right);
        assert_eq!(std::fs::read(right.join("f.txt")).unwrap(), b"new contents");
        assert_eq!(
            fs::read_attributes(&right.join("f.txt"), true).unwrap().mtime,
            2_000_000
        );
    }

    #[test]
    fn test_statistics_pre_pass() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("new.txt"), b"12345").unwrap();
        std::fs::write(right.join("gone.txt"), b"x").unwrap();

        let config = SyncConfig::default();
        let pair = FolderPairConfig {
            left: left.clone(),
            right: right.clone(),
            filter: None,
        };
        let cancel = CancelFlag::new();
        let mut base = compare_pair(&config, &pair, &NoopProgress, &cancel).unwrap();
        resolve_pair(&mut base, &config).unwrap();

        let stats = compute_statistics(&[base]);
        assert_eq!(stats.create_right, 1);
        assert_eq!(stats.delete_right, 1);
        assert_eq!(stats.bytes_to_copy, 5);
    }

    #[test]
    fn test_versioning_deletion() {
        let (_guard, left, right) = setup();
        let versions = left.parent().unwrap().join("versions");
        std::fs::write(right.join("doomed.txt"), b"save me").unwrap();

        let config = SyncConfig {
            deletion: DeletionPolicy::Versioning {
                path: versions.clone(),
                style: VersioningStyle::Replace,
            },
            ..Default::default()
        };
        sync_once(&config, &left, &right);

        assert!(!right.join("doomed.txt").exists());
        assert_eq!(
            std::fs::read(versions.join("doomed.txt")).unwrap(),
            b"save me"
        );
    }

    #[test]
    fn test_versioning_overwrite_preserves_old_target() {
        let (_guard, left, right) = setup();
        let versions = left.parent().unwrap().join("versions");
        std::fs::write(left.join("f.txt"), b"new").unwrap();
        std::fs::write(right.join("f.txt"), b"old").unwrap();
        fs::set_mtime(&left.join("f.txt"), 2_000_000, true).unwrap();
        fs::set_mtime(&right.join("f.txt"), 1_000_000, true).unwrap();

        let config = SyncConfig {
            deletion: DeletionPolicy::Versioning {
                path: versions.clone(),
                style: VersioningStyle::Replace,
            },
            ..Default::default()
        };
        sync_once(&config, &left, &right);

        assert_eq!(std::fs::read(right.join("f.txt")).unwrap(), b"new");
        assert_eq!(std::fs::read(versions.join("f.txt")).unwrap(), b"old");
    }

    #[test]
    fn test_recycler_collaborator() {
        struct Bin(std::sync::Mutex<Vec<PathBuf>>);
        impl Recycler for Bin {
            fn recycle(&self, path: &Path) -> std::result::Result<(), FsError> {
                self.0.lock().unwrap().push(path.to_path_buf());
                fs::remove_file(path).map(|_| ())
            }
        }

        let (_guard, left, right) = setup();
        std::fs::write(right.join("binned.txt"), b"x").unwrap();

        let config = SyncConfig {
            deletion: DeletionPolicy::Recycle,
            ..Default::default()
        };
        let pair = FolderPairConfig {
            left: left.clone(),
            right: right.clone(),
            filter: None,
        };
        let cancel = CancelFlag::new();
        let mut base = compare_pair(&config, &pair, &NoopProgress, &cancel).unwrap();
        resolve_pair(&mut base, &config).unwrap();
        let mut bases = [base];
        let mut errors = PolicyErrorSink::new(ErrorPolicy::Ignore, EventPublisher::noop());
        let bin = Bin(std::sync::Mutex::new(Vec::new()));
        execute(&mut bases, &config, &NoopProgress, &mut errors, &cancel, &bin).unwrap();

        assert_eq!(bin.0.lock().unwrap().len(), 1);
        assert!(!right.join("binned.txt").exists());
    }

    #[test]
    fn test_failed_items_counted_and_run_continues() {
        struct FailingRecycler;
        impl Recycler for FailingRecycler {
            fn recycle(&self, path: &Path) -> std::result::Result<(), FsError> {
                Err(FsError::new(FsErrorKind::Io, path, "bin unavailable"))
            }
        }

        let (_guard, left, right) = setup();
        std::fs::write(left.join("copy_me.txt"), b"payload").unwrap();
        std::fs::write(right.join("delete_me.txt"), b"x").unwrap();

        let config = SyncConfig {
            deletion: DeletionPolicy::Recycle,
            retry_count: 0,
            error_policy: ErrorPolicy::Ignore,
            ..Default::default()
        };
        let pair = FolderPairConfig {
            left: left.clone(),
            right: right.clone(),
            filter: None,
        };
        let cancel = CancelFlag::new();
        let mut base = compare_pair(&config, &pair, &NoopProgress, &cancel).unwrap();
        resolve_pair(&mut base, &config).unwrap();
        let mut bases = [base];
        let mut errors = PolicyErrorSink::new(ErrorPolicy::Ignore, EventPublisher::noop());
        let summary = execute(
            &mut bases,
            &config,
            &NoopProgress,
            &mut errors,
            &cancel,
            &FailingRecycler,
        )
        .unwrap();

        // the delete failed but the copy still went through
        assert_eq!(summary.items_failed, 1);
        assert_eq!(summary.items_completed, 1);
        assert!(right.join("copy_me.txt").exists());
        assert!(right.join("delete_me.txt").exists());
    }

    #[test]
    fn test_abort_unwinds_run() {
        struct AbortSink;
        impl ErrorSink for AbortSink {
            fn on_error(&mut self, _k: FsErrorKind, _m: &str, _r: bool) -> ErrorDecision {
                ErrorDecision::Abort
            }
        }
        struct FailingRecycler;
        impl Recycler for FailingRecycler {
            fn recycle(&self, path: &Path) -> std::result::Result<(), FsError> {
                Err(FsError::new(FsErrorKind::Io, path, "nope"))
            }
        }

        let (_guard, left, right) = setup();
        std::fs::write(right.join("delete_me.txt"), b"x").unwrap();

        let config = SyncConfig {
            deletion: DeletionPolicy::Recycle,
            ..Default::default()
        };
        let pair = FolderPairConfig {
            left: left.clone(),
            right: right.clone(),
            filter: None,
        };
        let cancel = CancelFlag::new();
        let mut base = compare_pair(&config, &pair, &NoopProgress, &cancel).unwrap();
        resolve_pair(&mut base, &config).unwrap();
        let mut bases = [base];
        let result = execute(
            &mut bases,
            &config,
            &NoopProgress,
            &mut AbortSink,
            &cancel,
            &FailingRecycler,
        );
        assert!(matches!(result, Err(SyncError::Aborted)));
    }

    #[test]
    fn test_unresolved_conflict_warns_without_action() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("thing"), b"file").unwrap();
        std::fs::create_dir(right.join("thing")).unwrap();

        // mirror forces conflicts right, but a kind conflict is not
        // executable and must degrade to a warning
        let summary = sync_once(&SyncConfig::default(), &left, &right);
        assert_eq!(summary.conflicts_unresolved, 1);
        assert!(left.join("thing").is_file());
        assert!(right.join("thing").is_dir());
    }

    #[test]
    fn test_update_policy_leaves_right_extras() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("new.txt"), b"n").unwrap();
        std::fs::write(right.join("extra.txt"), b"e").unwrap();

        let config = SyncConfig {
            direction: DirectionPolicy::Update,
            ..Default::default()
        };
        sync_once(&config, &left, &right);

        assert!(right.join("new.txt").exists());
        assert!(right.join("extra.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_created_on_target() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("data.txt"), b"x").unwrap();
        std::os::unix::fs::symlink("data.txt", left.join("link")).unwrap();

        sync_once(&SyncConfig::default(), &left, &right);

        let copied = right.join("link");
        assert_eq!(fs::exists(&copied), fs::PathKind::Symlink);
        assert_eq!(std::fs::read_link(&copied).unwrap(), PathBuf::from("data.txt"));
    }

    #[test]
    fn test_two_way_round_trip_updates_database() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("a.txt"), b"first").unwrap();
        fs::set_mtime(&left.join("a.txt"), 1_000_000, true).unwrap();

        let config = SyncConfig {
            direction: DirectionPolicy::Automatic,
            ..Default::default()
        };
        // first run: no database, one-time mirror, database created
        sync_once(&config, &left, &right);
        assert!(right.join("a.txt").exists());
        assert!(SyncDatabase::load(&left).is_some());

        // right edits the file; the change must flow left
        std::fs::write(right.join("a.txt"), b"edited").unwrap();
        fs::set_mtime(&right.join("a.txt"), 2_000_000, true).unwrap();
        sync_once(&config, &left, &right);
        assert_eq!(std::fs::read(left.join("a.txt")).unwrap(), b"edited");

        // left deletes; the deletion must flow right
        std::fs::remove_file(left.join("a.txt")).unwrap();
        sync_once(&config, &left, &right);
        assert!(!right.join("a.txt").exists());
    }

    #[test]
    fn test_two_way_conflict_is_reported_not_acted_on() {
        let (_guard, left, right) = setup();
        std::fs::write(left.join("a.txt"), b"base").unwrap();
        fs::set_mtime(&left.join("a.txt"), 1_000_000, true).unwrap();

        let config = SyncConfig {
            direction: DirectionPolicy::Automatic,
            ..Default::default()
        };
        sync_once(&config, &left, &right);

        // both sides diverge
        std::fs::write(left.join("a.txt"), b"left version").unwrap();
        fs::set_mtime(&left.join("a.txt"), 2_000_000, true).unwrap();
        std::fs::write(right.join("a.txt"), b"right version!").unwrap();
        fs::set_mtime(&right.join("a.txt"), 2_000_001, true).unwrap();

        let summary = sync_once(&config, &left, &right);
        assert_eq!(summary.conflicts_unresolved, 1);
        assert_eq!(std::fs::read(left.join("a.txt")).unwrap(), b"left version");
        assert_eq!(
            std::fs::read(right.join("a.txt")).unwrap(),
            b"right version!"
        );
    }
}
