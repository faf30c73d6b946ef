/*!
 * Tandem - two-sided directory synchronization CLI
 *
 * Batch-mode front end over the library: folder pairs and policies come
 * from a TOML file and/or command-line flags, progress renders on stderr,
 * and the exit code reports how the run went (0 clean, 1 finished with
 * errors or conflicts, 2 aborted).
 */

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use tandem::cli_progress::CliProgressRenderer;
use tandem::config::{
    CompareVariant, DeletionPolicy, DirectionPolicy, FolderPairConfig, SymlinkPolicy, SyncConfig,
    VersioningStyle,
};
use tandem::executor::NoRecycler;
use tandem::logging::init_logging;
use tandem::progress::{CancelFlag, EventPublisher, PolicyErrorSink};
use tandem::stats::format_bytes;
use tandem::{plan_sync, run_sync, SyncError};

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Synchronize two directory trees with crash-safe semantics"
)]
struct Cli {
    /// Left base directory (with RIGHT; otherwise pairs come from config)
    left: Option<PathBuf>,

    /// Right base directory
    right: Option<PathBuf>,

    /// Configuration file (default: ./tandem.toml, then ~/.tandem/tandem.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Make right identical to left
    #[arg(long, conflicts_with_all = ["update", "two_way"])]
    mirror: bool,

    /// Copy new and newer items left to right, delete nothing
    #[arg(long, conflicts_with = "two_way")]
    update: bool,

    /// Two-way sync backed by the per-pair database
    #[arg(long)]
    two_way: bool,

    /// Compare file contents instead of time and size
    #[arg(long)]
    by_content: bool,

    /// Symlink handling
    #[arg(long, value_enum, value_name = "POLICY")]
    symlinks: Option<SymlinkArg>,

    /// Exclude glob (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// Include glob (repeatable; empty means everything)
    #[arg(long = "include", value_name = "GLOB")]
    include: Vec<String>,

    /// Move deleted/overwritten items into this directory
    #[arg(long, value_name = "DIR")]
    versioning: Option<PathBuf>,

    /// Naming inside the versioning directory
    #[arg(long, value_enum, default_value = "replace", value_name = "STYLE")]
    versioning_style: VersioningArg,

    /// Retry attempts per failed item
    #[arg(long, value_name = "COUNT")]
    retry_count: Option<u32>,

    /// Delay between retries in seconds
    #[arg(long, value_name = "SECONDS")]
    retry_delay: Option<u32>,

    /// Preserve owner, group, mode and security context
    #[arg(long)]
    copy_permissions: bool,

    /// Write directly to targets instead of staging + atomic rename
    #[arg(long)]
    no_transactional: bool,

    /// Abort the whole run on the first error
    #[arg(long)]
    abort_on_error: bool,

    /// Show the plan without touching anything
    #[arg(long)]
    dry_run: bool,

    /// Log every item as it is processed
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to a file (JSON lines) instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SymlinkArg {
    Ignore,
    UseDirectly,
    Follow,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum VersioningArg {
    Replace,
    TimeStamp,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SyncConfig::load_with_fallback(),
    };
    apply_cli(&cli, &mut config)?;

    if config.pairs.is_empty() {
        anyhow::bail!("no folder pairs: pass LEFT RIGHT or configure pairs in tandem.toml");
    }

    init_logging(&config).context("initializing logging")?;

    let cancel = CancelFlag::new();
    let (publisher, subscriber) = EventPublisher::channel();
    let renderer = CliProgressRenderer::new(subscriber, cli.verbose).spawn();

    let outcome = if cli.dry_run {
        match plan_sync(&config, &publisher, &cancel) {
            Ok((_bases, stats)) => {
                eprintln!(
                    "dry run: {} creates, {} overwrites, {} deletes, {} metadata updates, \
                     {} conflicts, {} to copy",
                    stats.create_left + stats.create_right,
                    stats.overwrite_left + stats.overwrite_right,
                    stats.delete_left + stats.delete_right,
                    stats.metadata_left + stats.metadata_right,
                    stats.conflicts,
                    format_bytes(stats.bytes_to_copy)
                );
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => Err(err),
        }
    } else {
        let mut errors = PolicyErrorSink::new(config.error_policy, publisher.clone());
        match run_sync(&config, &publisher, &mut errors, &cancel, &NoRecycler) {
            Ok(summary) => {
                if summary.is_clean() {
                    Ok(ExitCode::SUCCESS)
                } else {
                    Ok(ExitCode::from(1))
                }
            }
            Err(err) => Err(err),
        }
    };

    drop(publisher);
    let _ = renderer.join();

    match outcome {
        Ok(code) => Ok(code),
        Err(SyncError::Aborted) => {
            eprintln!("run aborted");
            Ok(ExitCode::from(2))
        }
        Err(err) => Err(err.into()),
    }
}

fn apply_cli(cli: &Cli, config: &mut SyncConfig) -> anyhow::Result<()> {
    match (&cli.left, &cli.right) {
        (Some(left), Some(right)) => {
            config.pairs = vec![FolderPairConfig {
                left: left.clone(),
                right: right.clone(),
                filter: None,
            }];
        }
        (Some(_), None) => anyhow::bail!("LEFT given without RIGHT"),
        _ => {}
    }

    if cli.mirror {
        config.direction = DirectionPolicy::Mirror;
    } else if cli.update {
        config.direction = DirectionPolicy::Update;
    } else if cli.two_way {
        config.direction = DirectionPolicy::Automatic;
    }

    if cli.by_content {
        config.compare = CompareVariant::ByContent;
    }

    if let Some(policy) = cli.symlinks {
        config.symlinks = match policy {
            SymlinkArg::Ignore => SymlinkPolicy::Ignore,
            SymlinkArg::UseDirectly => SymlinkPolicy::UseDirectly,
            SymlinkArg::Follow => SymlinkPolicy::Follow,
        };
    }

    config.filter.exclude.extend(cli.exclude.iter().cloned());
    config.filter.include.extend(cli.include.iter().cloned());

    if let Some(dir) = &cli.versioning {
        config.deletion = DeletionPolicy::Versioning {
            path: dir.clone(),
            style: match cli.versioning_style {
                VersioningArg::Replace => VersioningStyle::Replace,
                VersioningArg::TimeStamp => VersioningStyle::TimeStamp,
            },
        };
    }

    if let Some(count) = cli.retry_count {
        config.retry_count = count;
    }
    if let Some(delay) = cli.retry_delay {
        config.retry_delay_secs = delay;
    }
    if cli.copy_permissions {
        config.copy_permissions = true;
    }
    if cli.no_transactional {
        config.transactional_copy = false;
    }
    if cli.abort_on_error {
        config.error_policy = tandem::config::ErrorPolicy::Abort;
    }
    if cli.verbose {
        config.verbose = true;
    }
    if let Some(path) = &cli.log_file {
        config.log_file = Some(path.clone());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_pair_and_policy() {
        let cli = Cli::parse_from(["tandem", "/l", "/r", "--two-way", "--by-content"]);
        let mut config = SyncConfig::default();
        apply_cli(&cli, &mut config).unwrap();
        assert_eq!(config.pairs.len(), 1);
        assert_eq!(config.direction, DirectionPolicy::Automatic);
        assert_eq!(config.compare, CompareVariant::ByContent);
    }

    #[test]
    fn test_cli_versioning() {
        let cli = Cli::parse_from([
            "tandem",
            "/l",
            "/r",
            "--versioning",
            "/versions",
            "--versioning-style",
            "time-stamp",
        ]);
        let mut config = SyncConfig::default();
        apply_cli(&cli, &mut config).unwrap();
        assert_eq!(
            config.deletion,
            DeletionPolicy::Versioning {
                path: PathBuf::from("/versions"),
                style: VersioningStyle::TimeStamp,
            }
        );
    }

    #[test]
    fn test_cli_left_without_right_rejected() {
        let cli = Cli::parse_from(["tandem", "/l"]);
        let mut config = SyncConfig::default();
        assert!(apply_cli(&cli, &mut config).is_err());
    }

    #[test]
    fn test_mirror_update_conflict_rejected_by_clap() {
        assert!(Cli::try_parse_from(["tandem", "/l", "/r", "--mirror", "--update"]).is_err());
    }
}
