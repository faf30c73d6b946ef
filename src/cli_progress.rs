/*!
 * CLI progress renderer
 *
 * Runs on its own thread, consuming engine events from the progress
 * channel and rendering them with indicatif. The engine never blocks on
 * the terminal: events are queued and drained here.
 */

use indicatif::{ProgressBar, ProgressStyle};
use std::thread;
use std::time::Duration;

use crate::progress::{EventSubscriber, SyncEvent};
use crate::stats::{format_bytes, format_duration};

pub struct CliProgressRenderer {
    subscriber: EventSubscriber,
    verbose: bool,
}

impl CliProgressRenderer {
    pub fn new(subscriber: EventSubscriber, verbose: bool) -> Self {
        Self {
            subscriber,
            verbose,
        }
    }

    /// Spawn the renderer on a background thread; it exits when the
    /// publisher side is dropped.
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("cli-progress".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn progress renderer")
    }

    pub fn run(self) {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .expect("static template"),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message("scanning...");

        let mut bar: Option<ProgressBar> = None;
        let mut scanning = Some(spinner);

        while let Some(event) = self.subscriber.recv() {
            match event {
                SyncEvent::ScanProgress { items } => {
                    if let Some(spinner) = &scanning {
                        spinner.set_message(format!("scanned {} items", items));
                    }
                }
                SyncEvent::CompareBytes { delta } => {
                    if let Some(spinner) = &scanning {
                        spinner.inc(delta);
                    }
                }
                SyncEvent::LockWait { path } => {
                    if let Some(spinner) = &scanning {
                        spinner.set_message(format!("waiting for lock {}", path.display()));
                    }
                }
                SyncEvent::PlanReady { stats } => {
                    if let Some(spinner) = scanning.take() {
                        spinner.finish_and_clear();
                    }
                    eprintln!(
                        "plan: {} items, {} to copy",
                        stats.total_items(),
                        format_bytes(stats.bytes_to_copy)
                    );
                    let progress = ProgressBar::new(stats.bytes_to_copy);
                    progress.set_style(
                        ProgressStyle::with_template(
                            "{bar:40} {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
                        )
                        .expect("static template"),
                    );
                    bar = Some(progress);
                }
                SyncEvent::CopyBytes { delta } => {
                    if let Some(bar) = &bar {
                        bar.inc(delta);
                    }
                }
                SyncEvent::ItemStarted { path, op } => {
                    if self.verbose {
                        let line = format!("{:?} {}", op, path.display());
                        match &bar {
                            Some(bar) => bar.println(line),
                            None => eprintln!("{}", line),
                        }
                    }
                }
                SyncEvent::Warning { message } => {
                    let line = format!("warning: {}", message);
                    match &bar {
                        Some(bar) => bar.println(line),
                        None => eprintln!("{}", line),
                    }
                }
                SyncEvent::RunFinished { summary } => {
                    if let Some(bar) = bar.take() {
                        bar.finish_and_clear();
                    }
                    eprintln!(
                        "done: {} items in {}, {} copied, {} failed, {} conflicts",
                        summary.items_completed,
                        format_duration(summary.duration),
                        format_bytes(summary.bytes_copied),
                        summary.items_failed,
                        summary.conflicts_unresolved
                    );
                }
            }
        }

        if let Some(spinner) = scanning.take() {
            spinner.finish_and_clear();
        }
    }
}
