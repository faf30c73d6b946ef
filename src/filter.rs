/*!
 * Item filtering
 *
 * Two layers with different strengths:
 * - the hard filter (include/exclude patterns) keeps items out of the tree
 *   entirely, applied at name level during traversal;
 * - the soft filter (time window, size bounds) only deactivates nodes, so
 *   they stay visible but are skipped by the executor.
 */

use chrono::{Datelike, Duration as ChronoDuration, Local, TimeZone};
use glob::Pattern as GlobPattern;
use regex::Regex;
use std::path::Path;
use thiserror::Error;

use crate::config::{FilterConfig, TimeSpan};

/// Errors that can occur while compiling filter patterns
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
}

/// A single compiled pattern
///
/// Plain strings compile as globs; `regex:` and `path:` prefixes select the
/// other matchers.
#[derive(Debug, Clone)]
enum CompiledPattern {
    Glob(GlobPattern),
    Regex(Regex),
    Path(String),
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Result<Self, FilterError> {
        let pattern = pattern.trim();
        if let Some(rest) = pattern.strip_prefix("regex:") {
            let rest = rest.trim();
            let compiled = Regex::new(rest).map_err(|e| FilterError::InvalidRegex {
                pattern: rest.to_string(),
                source: e,
            })?;
            Ok(CompiledPattern::Regex(compiled))
        } else if let Some(rest) = pattern.strip_prefix("path:") {
            Ok(CompiledPattern::Path(rest.trim().replace('\\', "/")))
        } else {
            let compiled = GlobPattern::new(pattern).map_err(|e| FilterError::InvalidGlob {
                pattern: pattern.to_string(),
                source: e,
            })?;
            Ok(CompiledPattern::Glob(compiled))
        }
    }

    fn matches(&self, normalized: &str, name: &str) -> bool {
        match self {
            // a bare-name glob like "*.tmp" should match at any depth
            CompiledPattern::Glob(p) => p.matches(normalized) || p.matches(name),
            CompiledPattern::Regex(r) => r.is_match(normalized),
            CompiledPattern::Path(exact) => normalized == exact,
        }
    }
}

/// Name-level filter deciding which items enter the tree at all.
#[derive(Debug, Clone, Default)]
pub struct HardFilter {
    include: Vec<CompiledPattern>,
    exclude: Vec<CompiledPattern>,
}

impl HardFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        let include = config
            .include
            .iter()
            .map(|p| CompiledPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = config
            .exclude
            .iter()
            .map(|p| CompiledPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { include, exclude })
    }

    /// Whether a file or symlink at `rel_path` enters the tree.
    ///
    /// Excludes always win; an empty include list admits everything.
    pub fn passes_file(&self, rel_path: &Path) -> bool {
        let (normalized, name) = normalize(rel_path);
        if self.exclude.iter().any(|p| p.matches(&normalized, &name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(&normalized, &name))
    }

    /// Whether a directory at `rel_path` is traversed.
    ///
    /// Include patterns describe files, so directories are only kept out by
    /// explicit excludes; otherwise traversal must continue to find
    /// matching descendants.
    pub fn passes_dir(&self, rel_path: &Path) -> bool {
        let (normalized, name) = normalize(rel_path);
        !self.exclude.iter().any(|p| p.matches(&normalized, &name))
    }
}

fn normalize(rel_path: &Path) -> (String, String) {
    let normalized = rel_path.to_string_lossy().replace('\\', "/");
    let name = rel_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (normalized, name)
}

/// Metadata-level filter deciding which in-tree items stay active.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftFilter {
    /// Oldest admissible mtime, seconds since epoch
    min_mtime: Option<i64>,
    min_size: Option<u64>,
    max_size: Option<u64>,
}

impl SoftFilter {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            min_mtime: time_span_cutoff(config.time_span),
            min_size: config.size_min.in_bytes(),
            max_size: config.size_max.in_bytes(),
        }
    }

    /// True when nothing would ever be deactivated
    pub fn is_null(&self) -> bool {
        self.min_mtime.is_none() && self.min_size.is_none() && self.max_size.is_none()
    }

    /// Whether a file with the given metadata stays active
    pub fn matches_file(&self, size: u64, mtime: i64) -> bool {
        if let Some(cutoff) = self.min_mtime {
            if mtime < cutoff {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if size > max {
                return false;
            }
        }
        true
    }
}

/// Start of the configured window as seconds since epoch
fn time_span_cutoff(span: TimeSpan) -> Option<i64> {
    let now = Local::now();
    let start = match span {
        TimeSpan::None => return None,
        TimeSpan::Today => now.date_naive().and_hms_opt(0, 0, 0)?,
        TimeSpan::ThisMonth => now
            .date_naive()
            .with_day(1)?
            .and_hms_opt(0, 0, 0)?,
        TimeSpan::ThisYear => now
            .date_naive()
            .with_month(1)?
            .with_day(1)?
            .and_hms_opt(0, 0, 0)?,
        TimeSpan::LastDays(days) => {
            return Some((now - ChronoDuration::days(i64::from(days))).timestamp())
        }
    };
    Local
        .from_local_datetime(&start)
        .earliest()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SizeLimit, SizeUnit};

    fn filter(include: &[&str], exclude: &[&str]) -> HardFilter {
        HardFilter::from_config(&FilterConfig {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_empty_filter_admits_all() {
        let f = filter(&[], &[]);
        assert!(f.passes_file(Path::new("any/file.bin")));
        assert!(f.passes_dir(Path::new("any")));
    }

    #[test]
    fn test_exclude_by_name_at_any_depth() {
        let f = filter(&[], &["*.tmp"]);
        assert!(!f.passes_file(Path::new("scratch.tmp")));
        assert!(!f.passes_file(Path::new("deep/nested/scratch.tmp")));
        assert!(f.passes_file(Path::new("scratch.txt")));
    }

    #[test]
    fn test_exclude_subtree() {
        let f = filter(&[], &["target/**", "target"]);
        assert!(!f.passes_dir(Path::new("target")));
        assert!(!f.passes_file(Path::new("target/debug/app")));
        assert!(f.passes_file(Path::new("src/main.rs")));
    }

    #[test]
    fn test_include_restricts_files_not_dirs() {
        let f = filter(&["*.rs"], &[]);
        assert!(f.passes_file(Path::new("src/main.rs")));
        assert!(!f.passes_file(Path::new("README.md")));
        // directories still traversed to find matching descendants
        assert!(f.passes_dir(Path::new("src")));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let f = filter(&["*.rs"], &["**/generated/**"]);
        assert!(!f.passes_file(Path::new("src/generated/bindings.rs")));
    }

    #[test]
    fn test_regex_pattern() {
        let f = filter(&[], &[r"regex:^logs/\d{4}/"]);
        assert!(!f.passes_file(Path::new("logs/2026/app.log")));
        assert!(f.passes_file(Path::new("logs/current/app.log")));
    }

    #[test]
    fn test_exact_path_pattern() {
        let f = filter(&[], &["path:notes/secret.txt"]);
        assert!(!f.passes_file(Path::new("notes/secret.txt")));
        assert!(f.passes_file(Path::new("notes/public.txt")));
    }

    #[test]
    fn test_invalid_glob_reported() {
        let config = FilterConfig {
            exclude: vec!["[invalid".to_string()],
            ..Default::default()
        };
        assert!(HardFilter::from_config(&config).is_err());
    }

    #[test]
    fn test_soft_filter_size_bounds() {
        let config = FilterConfig {
            size_min: SizeLimit {
                value: 1,
                unit: SizeUnit::Kib,
            },
            size_max: SizeLimit {
                value: 1,
                unit: SizeUnit::Mib,
            },
            ..Default::default()
        };
        let soft = SoftFilter::from_config(&config);
        assert!(!soft.is_null());
        assert!(!soft.matches_file(512, 0));
        assert!(soft.matches_file(4096, 0));
        assert!(!soft.matches_file(2 * 1024 * 1024, 0));
    }

    #[test]
    fn test_soft_filter_time_window() {
        let config = FilterConfig {
            time_span: TimeSpan::LastDays(7),
            ..Default::default()
        };
        let soft = SoftFilter::from_config(&config);
        let now = Local::now().timestamp();
        assert!(soft.matches_file(0, now));
        assert!(!soft.matches_file(0, now - 30 * 24 * 3600));
    }

    #[test]
    fn test_null_soft_filter() {
        let soft = SoftFilter::from_config(&FilterConfig::default());
        assert!(soft.is_null());
        assert!(soft.matches_file(0, 0));
    }
}
