/*!
 * Advisory directory lock
 *
 * Ensures at most one sync process operates on a given root at a time
 * while tolerating crashed holders. Coordination is purely filesystem
 * based: no OS mutex is portable across network shares.
 *
 * A holder keeps a background thread appending one byte to the lock file
 * every few seconds; waiters watch the file size and take over locks whose
 * size stops changing, or immediately when the record names a dead process
 * on the local host.
 */

mod lifesign;
mod record;

pub use lifesign::{LifeSignEmitter, LIFE_SIGN_INTERVAL};
pub use record::{LockId, LockRecord, LOCK_SCHEMA_VERSION};

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::error::{Result, SyncError};
use crate::progress::{CancelFlag, ProgressSink};

/// Well-known lock file name inside a sync root
pub const LOCK_FILE_NAME: &str = "sync.ffs_lock";

/// Granularity of the wait loop
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A lock whose size has not changed for this long is abandoned
pub const DETECT_EXITUS_INTERVAL: Duration = Duration::from_secs(30);

/// One held lock; dropped when the last shared handle goes away.
#[derive(Debug)]
struct HeldLock {
    lock_path: PathBuf,
    id: LockId,
    // emitter lifetime is a strict subset of the lock's
    _emitter: LifeSignEmitter,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        registry().lock().unwrap().forget(self.id);
        if let Err(err) = std::fs::remove_file(&self.lock_path) {
            tracing::debug!(
                "failed to remove lock file {}: {}",
                self.lock_path.display(),
                err
            );
        } else {
            tracing::debug!(id = %self.id, "released lock {}", self.lock_path.display());
        }
    }
}

/// Shared handle to a held directory lock.
///
/// Re-acquiring a lock this process already holds (by the same path, an
/// equivalent path, or any alias resolving to the same lock id) yields
/// another handle to the same lock; the file is released when the last
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct LockGuard {
    inner: Arc<HeldLock>,
}

impl LockGuard {
    pub fn id(&self) -> LockId {
        self.inner.id
    }

    pub fn lock_path(&self) -> &Path {
        &self.inner.lock_path
    }
}

/// Per-process lock registry: path → id and id → live lock.
#[derive(Default)]
struct Registry {
    by_path: HashMap<PathBuf, LockId>,
    by_id: HashMap<LockId, Weak<HeldLock>>,
}

impl Registry {
    fn find_by_path(&self, path: &Path) -> Option<LockGuard> {
        let id = self.by_path.get(path)?;
        self.find_by_id(*id)
    }

    fn find_by_id(&self, id: LockId) -> Option<LockGuard> {
        let inner = self.by_id.get(&id)?.upgrade()?;
        Some(LockGuard { inner })
    }

    fn insert(&mut self, path: PathBuf, id: LockId, lock: &Arc<HeldLock>) {
        self.by_path.insert(path, id);
        self.by_id.insert(id, Arc::downgrade(lock));
    }

    fn forget(&mut self, id: LockId) {
        self.by_id.remove(&id);
        self.by_path.retain(|_, v| *v != id);
    }
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::default()));
    &REGISTRY
}

/// Acquire the lock for a sync root, waiting out or taking over other
/// holders. Blocks until held, cancelled, or failed.
pub fn acquire_directory_lock(
    root: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<LockGuard> {
    // resolve aliases before consulting the registry
    let dir = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let lock_path = dir.join(LOCK_FILE_NAME);

    if let Some(guard) = registry().lock().unwrap().find_by_path(&lock_path) {
        return Ok(guard);
    }
    acquire_impl(&lock_path, progress, cancel)
}

fn acquire_impl(
    lock_path: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<LockGuard> {
    loop {
        cancel.check()?;
        match try_create(lock_path)? {
            Some(record) => {
                tracing::debug!(id = %record.id, "acquired lock {}", lock_path.display());
                let lock = Arc::new(HeldLock {
                    lock_path: lock_path.to_path_buf(),
                    id: record.id,
                    _emitter: LifeSignEmitter::spawn(lock_path.to_path_buf()),
                });
                registry()
                    .lock()
                    .unwrap()
                    .insert(lock_path.to_path_buf(), record.id, &lock);
                return Ok(LockGuard { inner: lock });
            }
            None => {
                if let Some(guard) = wait_until_free(lock_path, progress, cancel)? {
                    return Ok(guard);
                }
                // lock file gone: race for it again
            }
        }
    }
}

/// Atomically create the lock file for exclusive write and stamp the
/// record. `None` means somebody else holds it.
fn try_create(lock_path: &Path) -> Result<Option<LockRecord>> {
    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(err) => {
            return Err(SyncError::lock(
                lock_path,
                format!("cannot create lock file: {}", err),
            ))
        }
    };

    let record = LockRecord::new(local_host_id(), std::process::id() as u64);
    file.write_all(&record.encode())
        .and_then(|_| file.sync_all())
        .map_err(|err| SyncError::lock(lock_path, format!("cannot write lock record: {}", err)))?;
    Ok(Some(record))
}

/// Wait for the current holder to release, die, or be taken over.
///
/// `Ok(Some(guard))` re-acquired a lock this process already holds under an
/// alias; `Ok(None)` means the file is gone and creation should be retried.
fn wait_until_free(
    lock_path: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<Option<LockGuard>> {
    'observe: loop {
        cancel.check()?;

        let bytes = match std::fs::read(lock_path) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };

        let record = match LockRecord::decode(&bytes) {
            Some(record) => record,
            // short or corrupt record: abandoned
            None => {
                if take_over(lock_path, None, bytes.len() as u64, progress, cancel)? {
                    return Ok(None);
                }
                continue 'observe;
            }
        };

        // alias of a lock this process already holds
        if let Some(guard) = registry().lock().unwrap().find_by_id(record.id) {
            return Ok(Some(guard));
        }

        // dead holder on this very machine: no need to wait out the timer
        if record.host == local_host_id() && !process_alive(record.pid) {
            tracing::info!(
                id = %record.id,
                pid = record.pid,
                "lock holder no longer running, taking over {}",
                lock_path.display()
            );
            if take_over(
                lock_path,
                Some(record.id),
                bytes.len() as u64,
                progress,
                cancel,
            )? {
                return Ok(None);
            }
            continue 'observe;
        }

        // watch the life-sign: constant size for too long means abandoned
        let mut last_size = bytes.len() as u64;
        let mut last_change = Instant::now();
        loop {
            progress.on_wait(lock_path);
            cancel.check()?;
            std::thread::sleep(POLL_INTERVAL);

            let size = match std::fs::metadata(lock_path) {
                Ok(meta) => meta.len(),
                Err(_) => return Ok(None),
            };
            if size != last_size {
                last_size = size;
                last_change = Instant::now();
            } else if last_change.elapsed() >= DETECT_EXITUS_INTERVAL {
                tracing::info!(
                    "no life-sign on {} for {:?}, taking over",
                    lock_path.display(),
                    DETECT_EXITUS_INTERVAL
                );
                if take_over(lock_path, Some(record.id), last_size, progress, cancel)? {
                    return Ok(None);
                }
                continue 'observe;
            }
        }
    }
}

/// Delete an abandoned lock under the protection of a temporary sibling
/// lock, re-verifying that nobody else won the race or emitted a belated
/// life-sign. Returns whether the stale lock was removed.
fn take_over(
    lock_path: &Path,
    expected_id: Option<LockId>,
    observed_size: u64,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<bool> {
    let file_name = lock_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = lock_path.with_file_name(format!("Del.{}", file_name));

    // same protocol, sibling name; guard releases the temp lock on return
    let _temp_lock = acquire_impl(&temp_path, progress, cancel)?;

    let bytes = match std::fs::read(lock_path) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(true), // already gone
    };

    // another waiter won the race
    let current_id = LockRecord::decode(&bytes).map(|r| r.id);
    if current_id != expected_id {
        return Ok(false);
    }

    // belated life-sign: the holder is alive after all
    if bytes.len() as u64 > observed_size {
        return Ok(false);
    }

    std::fs::remove_file(lock_path)
        .map_err(|err| SyncError::lock(lock_path, format!("cannot remove stale lock: {}", err)))?;
    Ok(true)
}

/// Identifier of this machine, compared against lock records to allow
/// immediate takeover of locks held by dead local processes.
pub fn local_host_id() -> String {
    sysinfo::System::host_name()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn process_alive(pid: u64) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};
    let Ok(pid32) = u32::try_from(pid) else {
        return false;
    };
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid32)]), true);
    sys.process(Pid::from_u32(pid32)).is_some()
}
