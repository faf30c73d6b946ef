/*!
 * Directory lock behavior across holders
 */

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tandem::lock::{
    acquire_directory_lock, local_host_id, LockRecord, DETECT_EXITUS_INTERVAL, LOCK_FILE_NAME,
};
use tandem::progress::{CancelFlag, NoopProgress, ProgressSink};
use tandem::SyncError;

#[test]
fn lock_file_lives_and_dies_with_the_guard() {
    let dir = tempfile::tempdir().unwrap();
    let guard = acquire_directory_lock(dir.path(), &NoopProgress, &CancelFlag::new()).unwrap();

    let lock_path = guard.lock_path().to_path_buf();
    assert!(lock_path.exists());
    assert!(lock_path.ends_with(LOCK_FILE_NAME));

    let record = LockRecord::decode(&std::fs::read(&lock_path).unwrap()).unwrap();
    assert_eq!(record.host, local_host_id());
    assert_eq!(record.pid, std::process::id() as u64);

    drop(guard);
    assert!(!lock_path.exists());
}

#[test]
fn reacquire_by_alias_shares_one_lock() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("base");
    std::fs::create_dir(&root).unwrap();

    let first = acquire_directory_lock(&root, &NoopProgress, &CancelFlag::new()).unwrap();

    // a dot-infested alias of the same directory
    let alias = root.join(".");
    let second = acquire_directory_lock(&alias, &NoopProgress, &CancelFlag::new()).unwrap();
    assert_eq!(first.id(), second.id());

    let lock_path = first.lock_path().to_path_buf();
    drop(first);
    assert!(lock_path.exists(), "still held by the second handle");
    drop(second);
    assert!(!lock_path.exists());
}

#[test]
fn stale_lock_of_dead_local_process_is_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join(LOCK_FILE_NAME);

    let dead_pid = {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        u64::from(pid)
    };
    let stale = LockRecord::new(local_host_id(), dead_pid);
    std::fs::write(&lock_path, stale.encode()).unwrap();

    let started = Instant::now();
    let guard = acquire_directory_lock(dir.path(), &NoopProgress, &CancelFlag::new()).unwrap();

    // takeover must not require waiting out the life-sign timer
    assert!(started.elapsed() < DETECT_EXITUS_INTERVAL);
    assert_ne!(guard.id(), stale.id);

    // no takeover litter left behind
    let residue: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("Del."))
        .collect();
    assert!(residue.is_empty(), "leftover takeover locks: {:?}", residue);
}

#[test]
fn waiter_blocks_on_live_foreign_lock_until_it_disappears() {
    struct WaitCounter(AtomicU64);
    impl ProgressSink for WaitCounter {
        fn on_wait(&self, _lock_path: &Path) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join(LOCK_FILE_NAME);

    // live holder on a different machine: cannot be declared dead by pid
    let foreign = LockRecord::new("elsewhere-host", 1);
    std::fs::write(&lock_path, foreign.encode()).unwrap();

    // the "holder" releases after a while
    let release_path = lock_path.clone();
    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(600));
        std::fs::remove_file(&release_path).unwrap();
    });

    let waits = WaitCounter(AtomicU64::new(0));
    let started = Instant::now();
    let guard = acquire_directory_lock(dir.path(), &waits, &CancelFlag::new()).unwrap();
    releaser.join().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(400));
    assert!(waits.0.load(Ordering::Relaxed) > 0, "wait callback never fired");
    assert!(guard.lock_path().exists());
}

#[test]
fn waiting_is_cancellable() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join(LOCK_FILE_NAME);
    let foreign = LockRecord::new("elsewhere-host", 1);
    std::fs::write(&lock_path, foreign.encode()).unwrap();

    let cancel = CancelFlag::new();
    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            cancel.cancel();
        })
    };

    let result = acquire_directory_lock(dir.path(), &NoopProgress, &cancel);
    canceller.join().unwrap();
    assert!(matches!(result, Err(SyncError::Cancelled)));

    // the foreign lock is untouched
    assert!(lock_path.exists());
}

#[test]
fn truncated_record_counts_as_abandoned() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join(LOCK_FILE_NAME);
    let full = LockRecord::new(local_host_id(), std::process::id() as u64).encode();
    std::fs::write(&lock_path, &full[..10]).unwrap();

    let guard = acquire_directory_lock(dir.path(), &NoopProgress, &CancelFlag::new()).unwrap();
    let record = LockRecord::decode(&std::fs::read(&lock_path).unwrap()).unwrap();
    assert_eq!(record.id, guard.id());
}
