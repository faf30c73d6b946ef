/*!
 * Configuration structures and defaults for Tandem
 *
 * The recognized option set is closed: every struct derives
 * `deny_unknown_fields`, so a misspelled key is a load-time error instead
 * of a silently ignored setting.
 */

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How file pairs are judged equal during comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareVariant {
    /// Equal when mtimes agree within tolerance and sizes match
    ByTimeSize,
    /// Equal when the byte streams match
    ByContent,
}

impl Default for CompareVariant {
    fn default() -> Self {
        Self::ByTimeSize
    }
}

/// How symbolic links encountered during the scan are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymlinkPolicy {
    /// Drop links from the scan entirely
    Ignore,
    /// Record links as links and copy them as links
    UseDirectly,
    /// Dereference links and treat them as their targets
    Follow,
}

impl Default for SymlinkPolicy {
    fn default() -> Self {
        Self::UseDirectly
    }
}

/// Direction a category is synchronized towards, for custom rule sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Left,
    Right,
    None,
}

/// Per-category directions for the custom policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectionSet {
    pub left_only: Direction,
    pub right_only: Direction,
    pub left_newer: Direction,
    pub right_newer: Direction,
    pub different_content: Direction,
    pub conflict: Direction,
}

impl DirectionSet {
    /// Everything flows left to right; right-side extras are removed
    pub fn mirror() -> Self {
        Self {
            left_only: Direction::Right,
            right_only: Direction::Right, // deletion on the right
            left_newer: Direction::Right,
            right_newer: Direction::Right,
            different_content: Direction::Right,
            conflict: Direction::Right,
        }
    }

    /// Copy new and newer items left to right, touch nothing else
    pub fn update() -> Self {
        Self {
            left_only: Direction::Right,
            right_only: Direction::None,
            left_newer: Direction::Right,
            right_newer: Direction::None,
            different_content: Direction::None,
            conflict: Direction::None,
        }
    }
}

/// How the per-item sync direction is decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectionPolicy {
    /// Two-way sync driven by the per-pair database
    Automatic,
    /// Make right identical to left
    Mirror,
    /// One-way copy of new/newer items, no deletions
    Update,
    /// User-supplied per-category directions
    Custom(DirectionSet),
}

impl Default for DirectionPolicy {
    fn default() -> Self {
        Self::Mirror
    }
}

/// Naming scheme inside the versioning directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersioningStyle {
    /// Keep one revision, overwriting the previous one
    Replace,
    /// Append a timestamp so every revision survives
    TimeStamp,
}

/// What happens to files the sync deletes or overwrites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionPolicy {
    /// Remove outright
    Permanent,
    /// Hand off to the platform recycler collaborator
    Recycle,
    /// Move into a versioning directory, preserving relative paths
    Versioning {
        path: PathBuf,
        style: VersioningStyle,
    },
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self::Permanent
    }
}

/// Reaction to a failed item when no interactive sink overrides it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Defer to an interactive error sink
    Popup,
    /// Log and continue with the next item
    Ignore,
    /// Unwind the whole run on first error
    Abort,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::Popup
    }
}

/// Unit attached to a size bound; `None` deactivates the bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeUnit {
    None,
    Byte,
    Kib,
    Mib,
}

impl Default for SizeUnit {
    fn default() -> Self {
        Self::None
    }
}

/// One size bound of the soft filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SizeLimit {
    pub value: u64,
    pub unit: SizeUnit,
}

impl SizeLimit {
    /// The bound in bytes, or `None` when inactive
    pub fn in_bytes(&self) -> Option<u64> {
        match self.unit {
            SizeUnit::None => None,
            SizeUnit::Byte => Some(self.value),
            SizeUnit::Kib => Some(self.value * 1024),
            SizeUnit::Mib => Some(self.value * 1024 * 1024),
        }
    }
}

/// Time window of the soft filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeSpan {
    None,
    Today,
    ThisMonth,
    ThisYear,
    LastDays(u32),
}

impl Default for TimeSpan {
    fn default() -> Self {
        Self::None
    }
}

/// Name-level and metadata-level selection of items
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterConfig {
    /// Glob patterns an item must match to enter the tree (empty = all)
    pub include: Vec<String>,
    /// Glob patterns that keep an item out of the tree
    pub exclude: Vec<String>,
    /// Soft filter: only items modified inside the window stay active
    pub time_span: TimeSpan,
    /// Soft filter: minimum file size
    pub size_min: SizeLimit,
    /// Soft filter: maximum file size
    pub size_max: SizeLimit,
}

impl FilterConfig {
    /// Merge a per-pair override over the global filter: patterns are
    /// combined, soft bounds from the override win when set.
    pub fn overlay(&self, overlay: &FilterConfig) -> FilterConfig {
        let mut merged = self.clone();
        merged.include.extend(overlay.include.iter().cloned());
        merged.exclude.extend(overlay.exclude.iter().cloned());
        if overlay.time_span != TimeSpan::None {
            merged.time_span = overlay.time_span;
        }
        if overlay.size_min.unit != SizeUnit::None {
            merged.size_min = overlay.size_min;
        }
        if overlay.size_max.unit != SizeUnit::None {
            merged.size_max = overlay.size_max;
        }
        merged
    }
}

/// One configured left/right root pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderPairConfig {
    pub left: PathBuf,
    pub right: PathBuf,
    /// Per-pair filter overlaid on the global filter
    #[serde(default)]
    pub filter: Option<FilterConfig>,
}

/// Log verbosity written to the tracing filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Main configuration for one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Comparison variant
    pub compare: CompareVariant,

    /// Symlink handling during scan and execution
    pub symlinks: SymlinkPolicy,

    /// Direction resolution policy
    pub direction: DirectionPolicy,

    /// Fate of deleted/overwritten targets
    pub deletion: DeletionPolicy,

    /// Reaction to item errors when running unattended
    pub error_policy: ErrorPolicy,

    /// Retry attempts per failed item
    pub retry_count: u32,

    /// Delay between retry attempts in seconds
    pub retry_delay_secs: u32,

    /// Copy sources held open by other processes via volume snapshot
    pub copy_locked_files: bool,

    /// Preserve owner, group, mode and security context
    pub copy_permissions: bool,

    /// Write through a staging file committed by atomic rename
    pub transactional_copy: bool,

    /// Pair renames on one side by stable file id instead of copy+delete
    pub detect_moved_files: bool,

    /// Global filter, overlaid by per-pair filters
    pub filter: FilterConfig,

    /// Configured folder pairs
    pub pairs: Vec<FolderPairConfig>,

    /// Log verbosity
    pub log_level: LogLevel,

    /// Log destination file (stdout when absent)
    pub log_file: Option<PathBuf>,

    /// Force debug verbosity
    pub verbose: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            compare: CompareVariant::ByTimeSize,
            symlinks: SymlinkPolicy::UseDirectly,
            direction: DirectionPolicy::Mirror,
            deletion: DeletionPolicy::Permanent,
            error_policy: ErrorPolicy::Popup,
            retry_count: 3,
            retry_delay_secs: 5,
            copy_locked_files: false,
            copy_permissions: false,
            transactional_copy: true,
            detect_moved_files: false,
            filter: FilterConfig::default(),
            pairs: Vec::new(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file; unknown keys are errors
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration with fallback priority:
    /// 1. ./tandem.toml (project-specific)
    /// 2. ~/.tandem/tandem.toml (user defaults)
    /// 3. Built-in defaults
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(Path::new("tandem.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tandem").join("tandem.toml");
            if let Ok(config) = Self::load(&user_config) {
                return config;
            }
        }

        Self::default()
    }

    /// The custom direction set equivalent to the configured policy, when
    /// the policy is static (everything except `Automatic`)
    pub fn static_directions(&self) -> Option<DirectionSet> {
        match &self.direction {
            DirectionPolicy::Mirror => Some(DirectionSet::mirror()),
            DirectionPolicy::Update => Some(DirectionSet::update()),
            DirectionPolicy::Custom(set) => Some(*set),
            DirectionPolicy::Automatic => None,
        }
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
