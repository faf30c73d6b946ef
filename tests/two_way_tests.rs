/*!
 * Two-way (database-backed) synchronization scenarios
 */

use std::path::{Path, PathBuf};

use tandem::config::{ErrorPolicy, FolderPairConfig, SyncConfig};
use tandem::database::{SyncDatabase, DB_FILE_NAME};
use tandem::executor::NoRecycler;
use tandem::progress::{CancelFlag, EventPublisher, NoopProgress, PolicyErrorSink};
use tandem::stats::RunSummary;
use tandem::{run_sync, DirectionPolicy};

fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("left");
    let right = dir.path().join("right");
    std::fs::create_dir(&left).unwrap();
    std::fs::create_dir(&right).unwrap();
    (dir, left, right)
}

fn two_way_config(left: &Path, right: &Path) -> SyncConfig {
    SyncConfig {
        direction: DirectionPolicy::Automatic,
        pairs: vec![FolderPairConfig {
            left: left.to_path_buf(),
            right: right.to_path_buf(),
            filter: None,
        }],
        ..Default::default()
    }
}

fn sync(config: &SyncConfig) -> RunSummary {
    let mut errors = PolicyErrorSink::new(ErrorPolicy::Ignore, EventPublisher::noop());
    run_sync(
        config,
        &NoopProgress,
        &mut errors,
        &CancelFlag::new(),
        &NoRecycler,
    )
    .unwrap()
}

fn set_mtime(path: &Path, mtime: i64) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime, 0)).unwrap();
}

#[test]
fn first_run_mirrors_and_creates_database() {
    let (_guard, left, right) = setup();
    std::fs::write(left.join("a.txt"), b"seed").unwrap();

    let config = two_way_config(&left, &right);
    sync(&config);

    assert!(right.join("a.txt").exists());
    assert!(left.join(DB_FILE_NAME).exists());
    let db = SyncDatabase::load(&left).unwrap();
    assert!(db.lookup("a.txt").is_some());
}

#[test]
fn one_sided_edit_propagates_to_other_side() {
    let (_guard, left, right) = setup();
    std::fs::write(left.join("a.txt"), b"12345").unwrap();
    set_mtime(&left.join("a.txt"), 1_000_000);

    let config = two_way_config(&left, &right);
    sync(&config);

    // the LEFT side edits the file; size and mtime change
    std::fs::write(left.join("a.txt"), b"123456").unwrap();
    set_mtime(&left.join("a.txt"), 1_000_200);
    let summary = sync(&config);

    assert_eq!(summary.items_completed, 1);
    assert_eq!(std::fs::read(right.join("a.txt")).unwrap(), b"123456");

    // the database now records the new state on both sides
    let db = SyncDatabase::load(&left).unwrap();
    match db.lookup("a.txt").unwrap() {
        tandem::database::DbNode::File { size, mtime, .. } => {
            assert_eq!(*size, 6);
            assert_eq!(*mtime, 1_000_200);
        }
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn edits_on_opposite_sides_of_different_files_cross() {
    let (_guard, left, right) = setup();
    std::fs::write(left.join("a.txt"), b"a0").unwrap();
    std::fs::write(left.join("b.txt"), b"b0").unwrap();
    set_mtime(&left.join("a.txt"), 1_000_000);
    set_mtime(&left.join("b.txt"), 1_000_000);

    let config = two_way_config(&left, &right);
    sync(&config);

    std::fs::write(left.join("a.txt"), b"a1!").unwrap();
    set_mtime(&left.join("a.txt"), 1_000_100);
    std::fs::write(right.join("b.txt"), b"b1!").unwrap();
    set_mtime(&right.join("b.txt"), 1_000_100);

    sync(&config);

    assert_eq!(std::fs::read(right.join("a.txt")).unwrap(), b"a1!");
    assert_eq!(std::fs::read(left.join("b.txt")).unwrap(), b"b1!");
}

#[test]
fn both_sides_changed_differently_is_a_conflict() {
    let (_guard, left, right) = setup();
    std::fs::write(left.join("a.txt"), b"base!").unwrap();
    set_mtime(&left.join("a.txt"), 1_000_000);

    let config = two_way_config(&left, &right);
    sync(&config);

    std::fs::write(left.join("a.txt"), b"AAAAA").unwrap();
    set_mtime(&left.join("a.txt"), 2_000_000);
    std::fs::write(right.join("a.txt"), b"BBBBB").unwrap();
    set_mtime(&right.join("a.txt"), 2_000_001);

    let (publisher, subscriber) = EventPublisher::channel();
    let mut errors = PolicyErrorSink::new(ErrorPolicy::Ignore, publisher);
    let summary = run_sync(
        &config,
        &NoopProgress,
        &mut errors,
        &CancelFlag::new(),
        &NoRecycler,
    )
    .unwrap();

    // exactly one warning, no filesystem action
    assert_eq!(summary.conflicts_unresolved, 1);
    assert_eq!(errors.warning_count(), 1);
    assert_eq!(std::fs::read(left.join("a.txt")).unwrap(), b"AAAAA");
    assert_eq!(std::fs::read(right.join("a.txt")).unwrap(), b"BBBBB");

    let warnings: Vec<_> = std::iter::from_fn(|| subscriber.try_recv())
        .filter(|e| matches!(e, tandem::SyncEvent::Warning { .. }))
        .collect();
    assert_eq!(warnings.len(), 1);
}

#[test]
fn deletion_propagates_only_when_other_side_unchanged() {
    let (_guard, left, right) = setup();
    std::fs::write(left.join("stable.txt"), b"same").unwrap();
    std::fs::write(left.join("edited.txt"), b"v1").unwrap();
    set_mtime(&left.join("stable.txt"), 1_000_000);
    set_mtime(&left.join("edited.txt"), 1_000_000);

    let config = two_way_config(&left, &right);
    sync(&config);

    // right deletes both; left edits one of them in the meantime
    std::fs::remove_file(right.join("stable.txt")).unwrap();
    std::fs::remove_file(right.join("edited.txt")).unwrap();
    std::fs::write(left.join("edited.txt"), b"v2 with more bytes").unwrap();
    set_mtime(&left.join("edited.txt"), 2_000_000);

    let summary = sync(&config);

    // the untouched file follows the deletion, the edited one conflicts
    assert!(!left.join("stable.txt").exists());
    assert!(left.join("edited.txt").exists());
    assert_eq!(summary.conflicts_unresolved, 1);
}

#[test]
fn deleted_directory_propagates() {
    let (_guard, left, right) = setup();
    std::fs::create_dir(left.join("docs")).unwrap();
    std::fs::write(left.join("docs/a.txt"), b"a").unwrap();
    std::fs::write(left.join("docs/b.txt"), b"b").unwrap();
    set_mtime(&left.join("docs/a.txt"), 1_000_000);
    set_mtime(&left.join("docs/b.txt"), 1_000_000);

    let config = two_way_config(&left, &right);
    sync(&config);
    assert!(right.join("docs/b.txt").exists());

    // right removes the whole tree; nothing changed on the left
    std::fs::remove_dir_all(right.join("docs")).unwrap();
    sync(&config);

    assert!(!left.join("docs").exists());
}

#[test]
fn corrupt_database_falls_back_to_mirror() {
    let (_guard, left, right) = setup();
    std::fs::write(left.join("a.txt"), b"data").unwrap();
    std::fs::write(right.join("extra.txt"), b"will be mirrored away").unwrap();
    std::fs::write(left.join(DB_FILE_NAME), b"\xFFgarbage").unwrap();

    let config = two_way_config(&left, &right);
    sync(&config);

    // mirror semantics applied: right extras removed, left copied
    assert!(right.join("a.txt").exists());
    assert!(!right.join("extra.txt").exists());
    // and a fresh usable database exists afterwards
    assert!(SyncDatabase::load(&left).is_some());
}
