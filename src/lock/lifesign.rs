/*!
 * Life-sign emitter
 *
 * One background thread per held lock. Every emit period it appends a
 * single byte to the lock file so waiters can tell a live holder from a
 * crashed one by watching the file size. Write failures are ignored: on a
 * dropped network share the waiters will eventually take the lock over,
 * and the holder's own filesystem operations will fail first.
 */

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

/// Period between appended life-sign bytes
pub const LIFE_SIGN_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the emitter thread; dropping it stops the thread.
#[derive(Debug)]
pub struct LifeSignEmitter {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LifeSignEmitter {
    /// Start emitting life-signs for `lock_path`.
    pub fn spawn(lock_path: PathBuf) -> Self {
        Self::spawn_with_interval(lock_path, LIFE_SIGN_INTERVAL)
    }

    pub(crate) fn spawn_with_interval(lock_path: PathBuf, interval: Duration) -> Self {
        let (tx, rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("lock-lifesign".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let result = OpenOptions::new()
                            .append(true)
                            .open(&lock_path)
                            .and_then(|mut file| file.write_all(&[0]));
                        if let Err(err) = result {
                            tracing::debug!(
                                "life-sign append failed for {}: {}",
                                lock_path.display(),
                                err
                            );
                        }
                    }
                    // stop requested or handle dropped
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })
            .expect("failed to spawn life-sign thread");

        Self {
            stop: Some(tx),
            handle: Some(handle),
        }
    }
}

impl Drop for LifeSignEmitter {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_emitter_appends_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("probe.lock");
        std::fs::write(&lock_path, b"record").unwrap();

        let emitter =
            LifeSignEmitter::spawn_with_interval(lock_path.clone(), Duration::from_millis(20));

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let size = std::fs::metadata(&lock_path).unwrap().len();
            if size > 6 {
                break;
            }
            assert!(Instant::now() < deadline, "no life-sign within deadline");
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(emitter);
    }

    #[test]
    fn test_emitter_stops_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("probe.lock");
        std::fs::write(&lock_path, b"record").unwrap();

        let emitter =
            LifeSignEmitter::spawn_with_interval(lock_path.clone(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(50));
        drop(emitter);

        let size_after_stop = std::fs::metadata(&lock_path).unwrap().len();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(std::fs::metadata(&lock_path).unwrap().len(), size_after_stop);
    }

    #[test]
    fn test_missing_file_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let emitter = LifeSignEmitter::spawn_with_interval(
            dir.path().join("never_created.lock"),
            Duration::from_millis(10),
        );
        std::thread::sleep(Duration::from_millis(40));
        drop(emitter); // must not panic
    }
}
