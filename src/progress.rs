/*!
 * Progress, error and cancellation plumbing between the worker and its UI
 *
 * The engine calls the sink traits directly on the worker thread; a UI that
 * needs its own loop subscribes to the channel-backed `EventPublisher`
 * instead and marshals at its leisure.
 */

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FsErrorKind, Result, SyncError};
use crate::hierarchy::SyncOperation;
use crate::stats::{RunSummary, SyncStatistics};

/// Cooperative cancellation flag, polled at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the worker notices at its next suspension point
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Raise the cancellation sentinel if requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Answer from the error sink for one failed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Sleep for the configured delay and re-attempt
    Retry,
    /// Skip this item and continue with the next
    Ignore,
    /// Unwind the whole run
    Abort,
}

/// Progress callbacks, invoked on the worker thread (and, during the
/// two-sided scan, on its short-lived helper).
pub trait ProgressSink: Send + Sync {
    /// Cumulative number of items scanned so far (comparison phase)
    fn on_file_scanned(&self, _count: u64) {}

    /// Bytes consumed by content comparison since the last call
    fn on_bytes_compared(&self, _delta: u64) {}

    /// Bytes written by copies since the last call
    fn on_bytes_copied(&self, _delta: u64) {}

    /// The executor is starting on one item
    fn on_item_started(&self, _path: &Path, _op: SyncOperation) {}

    /// Waiting for a directory lock held elsewhere
    fn on_wait(&self, _lock_path: &Path) {}

    /// Statistics pre-pass finished; execution starts next
    fn on_plan_ready(&self, _stats: &SyncStatistics) {}

    /// The run finished or unwound
    fn on_run_finished(&self, _summary: &RunSummary) {}
}

/// Sink that discards everything, for library callers without a UI
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// Error callbacks, invoked on the worker thread.
///
/// `on_error` is only ever called with filesystem errors; cancellation
/// bypasses the sink entirely.
pub trait ErrorSink: Send {
    fn on_error(&mut self, kind: FsErrorKind, message: &str, retriable: bool) -> ErrorDecision;

    /// Non-fatal condition worth surfacing (unresolved conflict, skipped
    /// metadata copy)
    fn on_warning(&mut self, _message: &str) {}
}

/// Error sink for unattended runs, driven by the configured policy with a
/// per-kind ignore memory.
pub struct PolicyErrorSink {
    policy: crate::config::ErrorPolicy,
    ignored_kinds: HashSet<FsErrorKind>,
    publisher: EventPublisher,
    warnings: u64,
    errors: u64,
}

impl PolicyErrorSink {
    pub fn new(policy: crate::config::ErrorPolicy, publisher: EventPublisher) -> Self {
        Self {
            policy,
            ignored_kinds: HashSet::new(),
            publisher,
            warnings: 0,
            errors: 0,
        }
    }

    /// Suppress future prompts for one error kind
    pub fn ignore_kind(&mut self, kind: FsErrorKind) {
        self.ignored_kinds.insert(kind);
    }

    pub fn error_count(&self) -> u64 {
        self.errors
    }

    pub fn warning_count(&self) -> u64 {
        self.warnings
    }
}

impl ErrorSink for PolicyErrorSink {
    fn on_error(&mut self, kind: FsErrorKind, message: &str, _retriable: bool) -> ErrorDecision {
        self.errors += 1;
        if self.ignored_kinds.contains(&kind) {
            tracing::warn!(kind = %kind, "ignoring error (kind muted): {}", message);
            return ErrorDecision::Ignore;
        }
        match self.policy {
            crate::config::ErrorPolicy::Abort => {
                tracing::error!(kind = %kind, "{}", message);
                ErrorDecision::Abort
            }
            // headless run: a popup degrades to ignore-with-warning
            crate::config::ErrorPolicy::Popup | crate::config::ErrorPolicy::Ignore => {
                tracing::warn!(kind = %kind, "ignoring error: {}", message);
                self.publisher.publish(SyncEvent::Warning {
                    message: message.to_string(),
                });
                ErrorDecision::Ignore
            }
        }
    }

    fn on_warning(&mut self, message: &str) {
        self.warnings += 1;
        tracing::warn!("{}", message);
        self.publisher.publish(SyncEvent::Warning {
            message: message.to_string(),
        });
    }
}

/// Progress event for UI subscribers
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ScanProgress {
        items: u64,
    },
    CompareBytes {
        delta: u64,
    },
    CopyBytes {
        delta: u64,
    },
    ItemStarted {
        path: PathBuf,
        op: SyncOperation,
    },
    LockWait {
        path: PathBuf,
    },
    PlanReady {
        stats: SyncStatistics,
    },
    Warning {
        message: String,
    },
    RunFinished {
        summary: RunSummary,
    },
}

/// Publisher half of the progress channel; cheap to clone, and a no-op
/// when constructed without a subscriber.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: Option<Sender<SyncEvent>>,
}

impl EventPublisher {
    /// Publisher/subscriber pair over an unbounded channel
    pub fn channel() -> (Self, EventSubscriber) {
        let (tx, rx) = unbounded();
        (
            EventPublisher { sender: Some(tx) },
            EventSubscriber { receiver: rx },
        )
    }

    /// Publisher that drops every event
    pub fn noop() -> Self {
        EventPublisher { sender: None }
    }

    pub fn publish(&self, event: SyncEvent) {
        if let Some(ref tx) = self.sender {
            let _ = tx.send(event); // subscriber may have gone away
        }
    }
}

impl ProgressSink for EventPublisher {
    fn on_file_scanned(&self, count: u64) {
        self.publish(SyncEvent::ScanProgress { items: count });
    }

    fn on_bytes_compared(&self, delta: u64) {
        self.publish(SyncEvent::CompareBytes { delta });
    }

    fn on_bytes_copied(&self, delta: u64) {
        self.publish(SyncEvent::CopyBytes { delta });
    }

    fn on_item_started(&self, path: &Path, op: SyncOperation) {
        self.publish(SyncEvent::ItemStarted {
            path: path.to_path_buf(),
            op,
        });
    }

    fn on_wait(&self, lock_path: &Path) {
        self.publish(SyncEvent::LockWait {
            path: lock_path.to_path_buf(),
        });
    }

    fn on_plan_ready(&self, stats: &SyncStatistics) {
        self.publish(SyncEvent::PlanReady { stats: *stats });
    }

    fn on_run_finished(&self, summary: &RunSummary) {
        self.publish(SyncEvent::RunFinished {
            summary: summary.clone(),
        });
    }
}

/// Subscriber half of the progress channel
pub struct EventSubscriber {
    receiver: Receiver<SyncEvent>,
}

impl EventSubscriber {
    pub fn try_recv(&self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn recv(&self) -> Option<SyncEvent> {
        self.receiver.recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = SyncEvent> + '_ {
        self.receiver.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorPolicy;

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());
        flag.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(SyncError::Cancelled)));

        // clones share state
        let clone = flag.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_publisher_forwards_events() {
        let (publisher, subscriber) = EventPublisher::channel();
        publisher.on_file_scanned(42);
        publisher.on_bytes_copied(1024);

        assert!(matches!(
            subscriber.try_recv(),
            Some(SyncEvent::ScanProgress { items: 42 })
        ));
        assert!(matches!(
            subscriber.try_recv(),
            Some(SyncEvent::CopyBytes { delta: 1024 })
        ));
        assert!(subscriber.try_recv().is_none());
    }

    #[test]
    fn test_noop_publisher_does_not_panic() {
        let publisher = EventPublisher::noop();
        publisher.on_file_scanned(1);
        publisher.on_bytes_copied(1);
    }

    #[test]
    fn test_policy_sink_abort() {
        let mut sink = PolicyErrorSink::new(ErrorPolicy::Abort, EventPublisher::noop());
        let decision = sink.on_error(FsErrorKind::Io, "boom", true);
        assert_eq!(decision, ErrorDecision::Abort);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn test_policy_sink_kind_memory() {
        let mut sink = PolicyErrorSink::new(ErrorPolicy::Abort, EventPublisher::noop());
        sink.ignore_kind(FsErrorKind::PermissionDenied);
        let decision = sink.on_error(FsErrorKind::PermissionDenied, "denied", true);
        assert_eq!(decision, ErrorDecision::Ignore);
        // other kinds still abort
        let decision = sink.on_error(FsErrorKind::Io, "boom", true);
        assert_eq!(decision, ErrorDecision::Abort);
    }

    #[test]
    fn test_warnings_counted_and_published() {
        let (publisher, subscriber) = EventPublisher::channel();
        let mut sink = PolicyErrorSink::new(ErrorPolicy::Ignore, publisher);
        sink.on_warning("unresolved conflict: a.txt");
        assert_eq!(sink.warning_count(), 1);
        assert!(matches!(
            subscriber.try_recv(),
            Some(SyncEvent::Warning { .. })
        ));
    }
}
