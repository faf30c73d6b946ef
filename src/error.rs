/*!
 * Error types for Tandem
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Classification of a failed filesystem primitive.
///
/// The executor's retry loop and the local recovery paths in `fs` key off
/// this kind, never off the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    /// A parent directory expected to exist does not
    PathNotFound,
    /// Atomic create expected no prior entry
    TargetExists,
    /// Rename between filesystems not supported
    DifferentVolume,
    /// Open failed with a sharing/lock violation
    FileLocked,
    /// Security subsystem rejected the access
    PermissionDenied,
    /// Filesystem does not support a requested metadata copy (non-fatal)
    AttributeUnsupported,
    /// Unexpected OS error, native code carried as context
    Io,
}

impl FsErrorKind {
    /// Whether the executor should offer a retry for this kind
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            FsErrorKind::FileLocked | FsErrorKind::PermissionDenied | FsErrorKind::Io
        )
    }
}

impl fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsErrorKind::PathNotFound => write!(f, "path not found"),
            FsErrorKind::TargetExists => write!(f, "target exists"),
            FsErrorKind::DifferentVolume => write!(f, "different volume"),
            FsErrorKind::FileLocked => write!(f, "file locked"),
            FsErrorKind::PermissionDenied => write!(f, "permission denied"),
            FsErrorKind::AttributeUnsupported => write!(f, "attribute unsupported"),
            FsErrorKind::Io => write!(f, "i/o error"),
        }
    }
}

/// Error raised by a filesystem primitive, carrying the affected path.
#[derive(Debug)]
pub struct FsError {
    pub kind: FsErrorKind,
    pub path: PathBuf,
    pub message: String,
    pub source: Option<io::Error>,
}

impl FsError {
    pub fn new(kind: FsErrorKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an OS error, deriving the kind from the native error where possible
    pub fn from_io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        let kind = classify_io(&err);
        Self {
            kind,
            path: path.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.path.display(), self.message)
    }
}

impl std::error::Error for FsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as _)
    }
}

/// Map a native I/O error onto the primitive taxonomy.
fn classify_io(err: &io::Error) -> FsErrorKind {
    use io::ErrorKind::*;
    match err.kind() {
        NotFound => FsErrorKind::PathNotFound,
        AlreadyExists => FsErrorKind::TargetExists,
        PermissionDenied => FsErrorKind::PermissionDenied,
        CrossesDevices => FsErrorKind::DifferentVolume,
        Unsupported => FsErrorKind::AttributeUnsupported,
        _ => match err.raw_os_error() {
            // EXDEV surfaces as a plain error on some platforms
            #[cfg(unix)]
            Some(18) => FsErrorKind::DifferentVolume,
            // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
            #[cfg(windows)]
            Some(32) | Some(33) => FsErrorKind::FileLocked,
            _ => FsErrorKind::Io,
        },
    }
}

/// Top-level error for a sync run.
///
/// Cancellation is its own variant rather than an `FsErrorKind`: only `Fs`
/// errors are ever offered to the error sink, so an "ignore" answer can
/// never swallow a cancel.
#[derive(Debug)]
pub enum SyncError {
    /// A filesystem primitive failed
    Fs(FsError),

    /// Configuration is invalid or could not be loaded
    Config(String),

    /// Directory lock protocol failure (corrupt record, unreachable root)
    Lock { path: PathBuf, message: String },

    /// Two-way database could not be read or written
    Database { path: PathBuf, message: String },

    /// Cooperative cancellation was requested
    Cancelled,

    /// The error sink answered Abort
    Aborted,
}

impl SyncError {
    pub fn lock(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SyncError::Lock {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn database(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SyncError::Database {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for the cooperative-cancellation sentinel
    pub fn is_cancel(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// True when the whole run must unwind without consulting the sink
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::Cancelled | SyncError::Aborted)
    }

    /// Short lowercase tag for log lines
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::Fs(_) => "filesystem",
            SyncError::Config(_) => "configuration",
            SyncError::Lock { .. } => "lock",
            SyncError::Database { .. } => "database",
            SyncError::Cancelled => "cancelled",
            SyncError::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Fs(err) => write!(f, "{}", err),
            SyncError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::Lock { path, message } => {
                write!(f, "Directory lock error on {}: {}", path.display(), message)
            }
            SyncError::Database { path, message } => {
                write!(f, "Sync database error on {}: {}", path.display(), message)
            }
            SyncError::Cancelled => write!(f, "Operation cancelled"),
            SyncError::Aborted => write!(f, "Operation aborted"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Fs(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FsError> for SyncError {
    fn from(err: FsError) -> Self {
        SyncError::Fs(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(classify_io(&err), FsErrorKind::PathNotFound);
    }

    #[test]
    fn test_classify_already_exists() {
        let err = io::Error::new(io::ErrorKind::AlreadyExists, "there");
        assert_eq!(classify_io(&err), FsErrorKind::TargetExists);
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_exdev() {
        let err = io::Error::from_raw_os_error(18);
        assert_eq!(classify_io(&err), FsErrorKind::DifferentVolume);
    }

    #[test]
    fn test_retriable_kinds() {
        assert!(FsErrorKind::FileLocked.is_retriable());
        assert!(FsErrorKind::Io.is_retriable());
        assert!(!FsErrorKind::TargetExists.is_retriable());
        assert!(!FsErrorKind::DifferentVolume.is_retriable());
    }

    #[test]
    fn test_cancel_is_not_fs() {
        let err = SyncError::Cancelled;
        assert!(err.is_cancel());
        assert!(err.is_terminal());
        assert!(!SyncError::Config("x".to_string()).is_terminal());
    }

    #[test]
    fn test_display_carries_path() {
        let err = FsError::new(FsErrorKind::PathNotFound, "/a/b", "missing parent");
        let text = err.to_string();
        assert!(text.contains("/a/b"));
        assert!(text.contains("path not found"));
    }

    #[test]
    fn test_category_tags() {
        assert_eq!(SyncError::Cancelled.category(), "cancelled");
        assert_eq!(
            SyncError::Fs(FsError::new(FsErrorKind::Io, "/x", "boom")).category(),
            "filesystem"
        );
    }
}
