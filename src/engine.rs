/*!
 * Sync session orchestration
 *
 * Ties the phases together for one run: compare both trees of every
 * configured pair (taking the directory locks), resolve directions, then
 * execute. The locks live inside the returned mappings and are released
 * when the trees are dropped at the end of the run.
 */

use crate::compare::compare_all;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::executor::{compute_statistics, execute, Recycler};
use crate::hierarchy::BaseDirMapping;
use crate::progress::{CancelFlag, ErrorSink, ProgressSink};
use crate::resolve::resolve_all;
use crate::stats::{RunSummary, SyncStatistics};

/// Compare and resolve without touching anything; returns the annotated
/// trees and the work they imply. This is the dry-run path, and the first
/// half of `run_sync`.
pub fn plan_sync(
    config: &SyncConfig,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<(Vec<BaseDirMapping>, SyncStatistics)> {
    let mut bases = compare_all(config, progress, cancel)?;
    resolve_all(&mut bases, config)?;
    let stats = compute_statistics(&bases);
    Ok((bases, stats))
}

/// Run a full synchronization over every configured folder pair.
pub fn run_sync(
    config: &SyncConfig,
    progress: &dyn ProgressSink,
    errors: &mut dyn ErrorSink,
    cancel: &CancelFlag,
    recycler: &dyn Recycler,
) -> Result<RunSummary> {
    let (mut bases, stats) = plan_sync(config, progress, cancel)?;
    tracing::info!(
        items = stats.total_items(),
        bytes = stats.bytes_to_copy,
        "plan ready"
    );
    execute(&mut bases, config, progress, errors, cancel, recycler)
}
