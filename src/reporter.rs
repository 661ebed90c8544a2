use std::sync::Mutex;
use std::time::Duration;

use colored::*;
use index_rebuilder::{JobReport, JobReporter, RebuildCandidate, RebuildOutcome, RebuildStatus};
use indicatif::{ProgressBar, ProgressStyle};

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Scan: spinner (the query gives no progress)
/// - Rebuilds: one bar over the candidate list, resumed runs start part way
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&mut Option<ProgressBar>)) {
        if let Ok(mut guard) = self.bar.lock() {
            f(&mut guard);
        }
    }

    fn replace_bar(&self, pb: ProgressBar) {
        self.with_bar(|slot| {
            if let Some(old) = slot.replace(pb) {
                old.finish_and_clear();
            }
        });
    }

    fn finish_bar(&self) {
        self.with_bar(|slot| {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        });
    }

    fn rebuild_bar(&self, completed: usize, total: usize) {
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Rebuilding [{bar:30.cyan/dim}] {pos}/{len} {msg}",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICK_CHARS));
        }
        pb.set_position(completed as u64);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.replace_bar(pb);
    }
}

impl JobReporter for CliReporter {
    fn on_scan_start(&self) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICK_CHARS));
        }
        pb.set_message("Reading fragmentation statistics...");
        pb.enable_steady_tick(Duration::from_millis(80));
        self.replace_bar(pb);
    }

    fn on_scan_complete(&self, candidates: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Scan complete: {} indexes to rebuild in {:.2}s",
            "✓".green(),
            candidates,
            duration_secs
        );
        if candidates > 0 {
            self.rebuild_bar(0, candidates);
        }
    }

    fn on_resume(&self, completed: usize, total: usize) {
        eprintln!(
            "  {} Resuming: {} of {} indexes already attempted",
            "↻".cyan(),
            completed,
            total
        );
        self.rebuild_bar(completed, total);
    }

    fn on_rebuild_start(&self, _position: usize, _total: usize, candidate: &RebuildCandidate) {
        self.with_bar(|slot| {
            if let Some(pb) = slot.as_ref() {
                pb.set_message(candidate.to_string());
            }
        });
    }

    fn on_rebuild_complete(&self, position: usize, _total: usize, _outcome: &RebuildOutcome) {
        self.with_bar(|slot| {
            if let Some(pb) = slot.as_ref() {
                pb.set_position(position as u64);
            }
        });
    }

    fn on_job_complete(&self, _report: &JobReport) {
        self.finish_bar();
    }
}

pub fn print_report(report: &JobReport) {
    println!();
    println!("{}", format!("Index rebuild report: {}", report.job).bold());
    if let Some(done) = report.resumed_from {
        println!("  (resumed with {} already attempted)", done);
    }

    for outcome in &report.outcomes {
        let status = match outcome.status {
            RebuildStatus::Succeeded => "online ".green(),
            RebuildStatus::SucceededOffline => "offline".yellow(),
            RebuildStatus::Failed => "FAILED ".red(),
        };
        print!(
            "  {} {} ({:.2}s)",
            status, outcome.candidate, outcome.duration_secs
        );
        match &outcome.error {
            Some(detail) => println!(": {}", detail.red()),
            None => println!(),
        }
    }

    println!(
        "{} rebuilt online, {} rebuilt offline, {} failed, {:.2}s",
        format!("{}", report.succeeded()).green(),
        format!("{}", report.succeeded_offline()).yellow(),
        format!("{}", report.failed()).red(),
        report.duration.as_secs_f64(),
    );
}
