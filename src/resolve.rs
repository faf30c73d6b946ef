/*!
 * Direction resolution
 *
 * Annotates every node of a compared tree with the direction its data
 * flows, according to the configured policy. The static policies (mirror,
 * update, custom) are pure per-category lookups; the automatic policy
 * consults the per-pair database to tell which side changed since the
 * previous run.
 */

use crate::config::{Direction, DirectionPolicy, DirectionSet, SyncConfig};
use crate::database::{db_key, DbNode, SyncDatabase};
use crate::error::Result;
use crate::hierarchy::{
    BaseDirMapping, CompareResult, DirMapping, FileDescriptor, Side, SymlinkDescriptor,
    SyncDirection, SyncOperation,
};

/// Resolve directions for every configured pair.
pub fn resolve_all(bases: &mut [BaseDirMapping], config: &SyncConfig) -> Result<()> {
    for base in bases {
        resolve_pair(base, config)?;
    }
    Ok(())
}

/// Resolve directions for one pair.
pub fn resolve_pair(base: &mut BaseDirMapping, config: &SyncConfig) -> Result<()> {
    match config.static_directions() {
        Some(set) => {
            apply_static(&mut base.root, &set);
        }
        None => {
            debug_assert!(matches!(config.direction, DirectionPolicy::Automatic));
            match SyncDatabase::load(base.base_left()) {
                Some(db) => {
                    apply_two_way(&mut base.root, &db);
                }
                None => {
                    // first run: deterministic one-time mirror; the database
                    // is created at the end of the run
                    tracing::info!(
                        "no sync database under {}; running one-time mirror left to right",
                        base.base_left().display()
                    );
                    apply_static(&mut base.root, &DirectionSet::mirror());
                }
            }
        }
    }
    Ok(())
}

/// Category × policy table → per-node direction.
fn apply_static(node: &mut DirMapping, set: &DirectionSet) {
    for file in &mut node.subfiles {
        file.state.direction = static_direction(file.state.compare_result, set);
    }
    for link in &mut node.sublinks {
        link.state.direction = static_direction(link.state.compare_result, set);
    }
    for dir in &mut node.subdirs {
        dir.state.direction = static_direction(dir.state.compare_result, set);
        apply_static(dir, set);
    }
}

fn static_direction(category: CompareResult, set: &DirectionSet) -> SyncDirection {
    let configured = match category {
        CompareResult::Equal => return SyncDirection::None,
        CompareResult::LeftOnly => set.left_only,
        CompareResult::RightOnly => set.right_only,
        CompareResult::LeftNewer => set.left_newer,
        CompareResult::RightNewer => set.right_newer,
        CompareResult::DifferentContent | CompareResult::DifferentMetadataOnly => {
            set.different_content
        }
        CompareResult::Conflict => set.conflict,
    };
    match configured {
        Direction::Left => SyncDirection::Left,
        Direction::Right => SyncDirection::Right,
        Direction::None => {
            if category == CompareResult::Conflict {
                SyncDirection::Conflict
            } else {
                SyncDirection::None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Automatic (two-way)

/// How one side relates to the recorded previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideChange {
    Unchanged,
    Changed,
}

fn apply_two_way(node: &mut DirMapping, db: &SyncDatabase) {
    for file in &mut node.subfiles {
        let previous = db.lookup(&db_key(&file.state.rel_path()));
        let direction = two_way_direction(
            file.state.compare_result,
            file.state.left_present,
            file.state.right_present,
            previous.map(|p| file_change(&file.left, p)),
            previous.map(|p| file_change(&file.right, p)),
        );
        set_two_way(&mut file.state, direction);
    }
    for link in &mut node.sublinks {
        let previous = db.lookup(&db_key(&link.state.rel_path()));
        let direction = two_way_direction(
            link.state.compare_result,
            link.state.left_present,
            link.state.right_present,
            previous.map(|p| link_change(&link.left, p)),
            previous.map(|p| link_change(&link.right, p)),
        );
        set_two_way(&mut link.state, direction);
    }
    for dir in &mut node.subdirs {
        let previously_known = db.lookup(&db_key(&dir.state.rel_path())).is_some();
        dir.state.direction = match dir.state.compare_result {
            CompareResult::LeftOnly => {
                if previously_known {
                    // the right side deleted it since the last run
                    SyncDirection::Left
                } else {
                    SyncDirection::Right
                }
            }
            CompareResult::RightOnly => {
                if previously_known {
                    SyncDirection::Right
                } else {
                    SyncDirection::Left
                }
            }
            _ => SyncDirection::None,
        };
        apply_two_way(dir, db);

        // a directory may only disappear if every descendant on that side
        // goes with it; a surviving conflict or modification keeps it
        if let Some(delete_side) = dir_delete_side(dir) {
            if !all_descendants_delete_on(dir, delete_side) {
                dir.state.direction = SyncDirection::None;
            }
        }
    }
}

/// The side a directory deletion would clear, if its direction means
/// deletion (target side equals the only populated side).
fn dir_delete_side(dir: &DirMapping) -> Option<Side> {
    match (dir.state.compare_result, dir.state.direction) {
        (CompareResult::LeftOnly, SyncDirection::Left) => Some(Side::Left),
        (CompareResult::RightOnly, SyncDirection::Right) => Some(Side::Right),
        _ => None,
    }
}

fn all_descendants_delete_on(dir: &DirMapping, side: Side) -> bool {
    let wanted = match side {
        Side::Left => SyncDirection::Left,
        Side::Right => SyncDirection::Right,
    };
    dir.subfiles
        .iter()
        .all(|f| !f.state.is_present_on(side) || f.state.direction == wanted)
        && dir
            .sublinks
            .iter()
            .all(|l| !l.state.is_present_on(side) || l.state.direction == wanted)
        && dir.subdirs.iter().all(|d| {
            (!d.state.is_present_on(side) || d.state.direction == wanted)
                && all_descendants_delete_on(d, side)
        })
}

enum TwoWayDirection {
    Go(SyncDirection),
    Conflict(&'static str),
}

fn two_way_direction(
    category: CompareResult,
    left_present: bool,
    right_present: bool,
    left_change: Option<SideChange>,
    right_change: Option<SideChange>,
) -> TwoWayDirection {
    use SideChange::*;
    use TwoWayDirection::*;

    if category == CompareResult::Equal {
        return Go(SyncDirection::None);
    }

    match (left_present, right_present) {
        (true, true) => match (left_change, right_change) {
            // unknown to the database: both sides appeared independently
            (None, _) | (_, None) => Conflict("both sides changed since last sync"),
            (Some(Changed), Some(Unchanged)) => Go(SyncDirection::Right),
            (Some(Unchanged), Some(Changed)) => Go(SyncDirection::Left),
            (Some(Changed), Some(Changed)) => Conflict("both sides changed since last sync"),
            (Some(Unchanged), Some(Unchanged)) => {
                // sides differ yet neither moved: stale database
                Conflict("sides differ but neither changed since last sync")
            }
        },
        (true, false) => match left_change {
            None => Go(SyncDirection::Right), // new on the left
            Some(Unchanged) => Go(SyncDirection::Left), // deleted on the right
            Some(Changed) => Conflict("deleted on one side, modified on the other"),
        },
        (false, true) => match right_change {
            None => Go(SyncDirection::Left), // new on the right
            Some(Unchanged) => Go(SyncDirection::Right), // deleted on the left
            Some(Changed) => Conflict("deleted on one side, modified on the other"),
        },
        (false, false) => Go(SyncDirection::None),
    }
}

fn set_two_way(state: &mut crate::hierarchy::PairState, direction: TwoWayDirection) {
    match direction {
        TwoWayDirection::Go(dir) => state.direction = dir,
        TwoWayDirection::Conflict(description) => state.set_conflict(description),
    }
}

fn file_change(current: &FileDescriptor, previous: &DbNode) -> SideChange {
    match previous {
        DbNode::File { size, mtime, .. } => {
            let same = current.size == *size
                && (current.mtime - mtime).abs() <= crate::compare::MTIME_TOLERANCE_SECS;
            if same {
                SideChange::Unchanged
            } else {
                SideChange::Changed
            }
        }
        _ => SideChange::Changed, // kind changed since last sync
    }
}

fn link_change(current: &SymlinkDescriptor, previous: &DbNode) -> SideChange {
    match previous {
        DbNode::Symlink { mtime, target } => {
            let same = current.target == *target
                && (current.mtime - mtime).abs() <= crate::compare::MTIME_TOLERANCE_SECS;
            if same {
                SideChange::Unchanged
            } else {
                SideChange::Changed
            }
        }
        _ => SideChange::Changed,
    }
}

// ---------------------------------------------------------------------------
// Operation mapping

/// Mechanical category × direction × active mapping to the executor's
/// per-node operation.
pub fn map_operation(
    category: CompareResult,
    direction: SyncDirection,
    active: bool,
) -> SyncOperation {
    if !active {
        return SyncOperation::DoNothing;
    }
    match direction {
        SyncDirection::Conflict => SyncOperation::UnresolvedConflict,
        SyncDirection::None => match category {
            CompareResult::Conflict => SyncOperation::UnresolvedConflict,
            CompareResult::Equal => SyncOperation::Equal,
            _ => SyncOperation::DoNothing,
        },
        SyncDirection::Left => match category {
            CompareResult::LeftOnly => SyncOperation::DeleteLeft,
            CompareResult::RightOnly => SyncOperation::CreateLeft,
            CompareResult::DifferentMetadataOnly => SyncOperation::CopyMetadataToLeft,
            CompareResult::Equal => SyncOperation::Equal,
            _ => SyncOperation::OverwriteLeft,
        },
        SyncDirection::Right => match category {
            CompareResult::LeftOnly => SyncOperation::CreateRight,
            CompareResult::RightOnly => SyncOperation::DeleteRight,
            CompareResult::DifferentMetadataOnly => SyncOperation::CopyMetadataToRight,
            CompareResult::Equal => SyncOperation::Equal,
            _ => SyncOperation::OverwriteRight,
        },
    }
}
