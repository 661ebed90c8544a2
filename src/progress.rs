use crate::job::JobReport;
use crate::rebuild::RebuildOutcome;
use crate::scanner::RebuildCandidate;

/// Trait for reporting job progress.
///
/// The CLI implements it with indicatif; tests use [`SilentReporter`].
/// All methods have default no-op implementations.
pub trait JobReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_complete(&self, _candidates: usize, _duration_secs: f64) {}
    fn on_resume(&self, _completed: usize, _total: usize) {}
    fn on_rebuild_start(&self, _position: usize, _total: usize, _candidate: &RebuildCandidate) {}
    fn on_rebuild_complete(&self, _position: usize, _total: usize, _outcome: &RebuildOutcome) {}
    fn on_job_complete(&self, _report: &JobReport) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl JobReporter for SilentReporter {}
