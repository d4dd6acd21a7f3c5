use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use nvsync_pipeline::{
    Direction, ItemOutcome, PlannedAction, ProgressTracker, RunReport, RunStatus, SyncEvent,
};
use std::fmt::Display;

pub(crate) const RULE: &str = "─────────────────────────────────────";

pub(crate) fn describe(action: &PlannedAction, path: impl Display) -> String {
    match action {
        PlannedAction::Upload(reason) => format!("Uploading: {path} ({reason})"),
        PlannedAction::Download(reason) => format!("Downloading: {path} ({reason})"),
        PlannedAction::DeleteRemote => format!("Deleting remote: {path}"),
        PlannedAction::DeleteLocal => format!("Deleting local: {path}"),
    }
}

/// Renders engine events as per-item lines above a byte progress bar.
pub(crate) struct EventPrinter {
    bar: ProgressBar,
    tracker: ProgressTracker,
    quiet: bool,
}

impl EventPrinter {
    /// `quiet` suppresses all output, used when the caller wants JSON only.
    pub(crate) fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        };
        Self {
            bar,
            tracker: ProgressTracker::open_ended(),
            quiet,
        }
    }

    fn line(&self, text: String) {
        if !self.quiet {
            self.bar.suspend(|| println!("{text}"));
        }
    }

    pub(crate) fn handle(&mut self, event: SyncEvent) {
        self.tracker.update(&event);
        match &event {
            SyncEvent::Started { path, action, .. } => self.line(describe(action, path)),
            SyncEvent::Progress { .. } => {}
            SyncEvent::Finished {
                path,
                action,
                outcome,
            } => match outcome {
                ItemOutcome::WouldApply => self.line(describe(action, path)),
                ItemOutcome::Failed(err) => self.line(format!("  Failed: {path}: {err}")),
                ItemOutcome::Succeeded => {}
                ItemOutcome::Cancelled => self.line(format!("  Cancelled: {path}")),
            },
        }

        let snap = self.tracker.snapshot();
        self.bar.set_length(snap.total_bytes);
        self.bar.set_position(snap.done_bytes);
        self.bar.set_message(format!(
            "{}/{} files {}/s",
            snap.finished_items + snap.failed_count,
            snap.total_items,
            format_size(snap.speed_bps, DECIMAL)
        ));
    }

    pub(crate) fn finish(self) {
        self.bar.finish_and_clear();
    }
}

/// Final tally. Printed for every run, dry or live, successful or not.
pub(crate) fn print_summary(report: &RunReport, show_deleted: bool) {
    let stats = &report.stats;
    let (moved, verb) = match (report.direction, report.dry_run) {
        (Direction::Push, false) => (stats.transferred, "Uploaded:   "),
        (Direction::Pull, false) => (stats.transferred, "Downloaded: "),
        (Direction::Push, true) => (stats.would_transfer, "To upload:  "),
        (Direction::Pull, true) => (stats.would_transfer, "To download:"),
    };
    let deleted = if report.dry_run {
        stats.would_delete
    } else {
        stats.deleted
    };

    println!();
    println!("{RULE}");
    if report.dry_run {
        println!("Summary (dry run):");
    } else {
        println!("Summary:");
    }
    println!("  {verb} {moved} files");
    println!("  Skipped:     {} files (already up to date)", stats.skipped);
    if show_deleted {
        println!("  Deleted:     {deleted} files");
    }
    println!("  Failed:      {} files", stats.failed);
    if !report.dry_run {
        println!(
            "  Transferred: {}",
            format_size(stats.bytes_transferred, DECIMAL)
        );
    }
    match report.status {
        RunStatus::Success => {}
        RunStatus::PartialFailure => println!("  Status:      completed with failures"),
        RunStatus::Cancelled => println!("  Status:      cancelled"),
    }
    println!("{RULE}");
}

pub(crate) fn print_removal_summary(report: &RunReport) {
    let stats = &report.stats;
    println!();
    println!("{RULE}");
    if report.dry_run {
        println!(
            "Summary (dry run): {} files would be deleted",
            stats.would_delete
        );
    } else {
        println!("Summary:");
        println!("  Deleted: {} files", stats.deleted);
        println!("  Failed:  {} files", stats.failed);
    }
    if report.status == RunStatus::Cancelled {
        println!("  Status:  cancelled");
    }
    println!("{RULE}");
}
