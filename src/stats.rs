/*!
 * Run statistics
 */

use std::time::Duration;

/// Work the executor is about to perform, computed by a pre-pass over the
/// resolved tree and published to the progress sink before the first
/// filesystem mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatistics {
    pub create_left: u64,
    pub create_right: u64,
    pub overwrite_left: u64,
    pub overwrite_right: u64,
    pub delete_left: u64,
    pub delete_right: u64,
    pub metadata_left: u64,
    pub metadata_right: u64,
    pub conflicts: u64,
    /// Total payload bytes of all creates and overwrites
    pub bytes_to_copy: u64,
}

impl SyncStatistics {
    /// Total number of items the executor will touch
    pub fn total_items(&self) -> u64 {
        self.create_left
            + self.create_right
            + self.overwrite_left
            + self.overwrite_right
            + self.delete_left
            + self.delete_right
            + self.metadata_left
            + self.metadata_right
    }

    /// True when the trees are already in sync
    pub fn is_empty(&self) -> bool {
        self.total_items() == 0
    }
}

/// What actually happened, reported after the run completes or unwinds.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_skipped: u64,
    pub conflicts_unresolved: u64,
    pub bytes_copied: u64,
    pub duration: Duration,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.items_failed == 0 && self.conflicts_unresolved == 0
    }
}

/// Format bytes into human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let base = 1024.0_f64;
    let exp = (bytes_f.ln() / base.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);

    let value = bytes_f / base.powi(exp as i32);

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.2} {}", value, UNITS[exp])
    }
}

/// Format a duration into human-readable form
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    if ms < 1000 {
        return format!("{}ms", ms);
    }

    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
