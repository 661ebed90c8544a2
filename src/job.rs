use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore, JobKey};
use crate::db::Connector;
use crate::error::{Error, Result};
use crate::progress::JobReporter;
use crate::rebuild::{self, RebuildOptions, RebuildOutcome, RebuildStatus};
use crate::scanner::{self, SCAN_TIMEOUT};

/// What to run: which job, and the limits each step runs under.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job: JobKey,
    pub scan_timeout: Duration,
    pub rebuild: RebuildOptions,
}

impl JobPlan {
    pub fn new(job: JobKey) -> Self {
        Self {
            job,
            scan_timeout: SCAN_TIMEOUT,
            rebuild: RebuildOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: JobKey,
    pub outcomes: Vec<RebuildOutcome>,
    /// Number of candidates already done when this run picked the job up.
    pub resumed_from: Option<usize>,
    pub duration: Duration,
}

impl JobReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn count(&self, status: RebuildStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(RebuildStatus::Succeeded)
    }

    pub fn succeeded_offline(&self) -> usize {
        self.count(RebuildStatus::SucceededOffline)
    }

    pub fn failed(&self) -> usize {
        self.count(RebuildStatus::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RebuildOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RebuildStatus::Failed)
    }
}

/// Drives the candidate list one index at a time, checkpointing after each
/// attempt so an interrupted run resumes at the first unattempted candidate.
pub struct JobDriver<'a, C: Connector, S: CheckpointStore> {
    connector: &'a C,
    store: &'a S,
    plan: JobPlan,
}

impl<'a, C: Connector, S: CheckpointStore> JobDriver<'a, C, S> {
    pub fn new(connector: &'a C, store: &'a S, plan: JobPlan) -> Self {
        Self {
            connector,
            store,
            plan,
        }
    }

    /// Run the job to completion:
    /// 1. Resume from a matching checkpoint, or scan and checkpoint the list
    /// 2. Rebuild each pending candidate, checkpointing after every attempt
    /// 3. Clear the checkpoint and report every outcome, including resumed ones
    pub async fn run(&self, reporter: &dyn JobReporter) -> Result<JobReport> {
        let start = Instant::now();
        let (mut checkpoint, resumed_from) = self.start(reporter).await?;
        let total = checkpoint.candidates.len();

        while let Some(candidate) = checkpoint.next_candidate().cloned() {
            let position = checkpoint.next_index + 1;
            info!(index = %candidate, "[{}/{}] Starting rebuild", position, total);
            reporter.on_rebuild_start(position, total, &candidate);

            let outcome = rebuild::rebuild_index(self.connector, &candidate, &self.plan.rebuild).await;
            log_outcome(position, total, &outcome);
            reporter.on_rebuild_complete(position, total, &outcome);

            checkpoint.record(outcome);
            self.store.save(&checkpoint)?;
        }

        self.store.clear()?;

        let report = JobReport {
            job: checkpoint.job,
            outcomes: checkpoint.outcomes,
            resumed_from,
            duration: start.elapsed(),
        };
        info!(
            "Job complete: {} succeeded, {} succeeded offline, {} failed in {:.2}s",
            report.succeeded(),
            report.succeeded_offline(),
            report.failed(),
            report.duration.as_secs_f64()
        );
        reporter.on_job_complete(&report);
        Ok(report)
    }

    async fn start(&self, reporter: &dyn JobReporter) -> Result<(Checkpoint, Option<usize>)> {
        match self.store.load()? {
            Some(checkpoint) if checkpoint.job == self.plan.job => {
                info!(
                    "Resuming {}: {} of {} candidates already attempted",
                    checkpoint.job,
                    checkpoint.next_index,
                    checkpoint.candidates.len()
                );
                reporter.on_resume(checkpoint.next_index, checkpoint.candidates.len());
                let done = checkpoint.next_index;
                Ok((checkpoint, Some(done)))
            }
            Some(checkpoint) => Err(Error::CheckpointMismatch {
                expected: self.plan.job.to_string(),
                found: checkpoint.job.to_string(),
            }),
            None => {
                info!("Scanning {} for fragmented indexes", self.plan.job);
                reporter.on_scan_start();
                let scan_start = Instant::now();
                let candidates = scanner::scan(
                    self.connector,
                    &self.plan.job.database,
                    f64::from(self.plan.job.threshold_percent),
                    self.plan.job.table_filter.as_deref(),
                    self.plan.scan_timeout,
                )
                .await?;
                reporter.on_scan_complete(candidates.len(), scan_start.elapsed().as_secs_f64());

                let checkpoint = Checkpoint::new(self.plan.job.clone(), candidates);
                if !checkpoint.is_done() {
                    self.store.save(&checkpoint)?;
                }
                Ok((checkpoint, None))
            }
        }
    }
}

fn log_outcome(position: usize, total: usize, outcome: &RebuildOutcome) {
    let index = &outcome.candidate;
    match outcome.status {
        RebuildStatus::Succeeded => info!(
            index = %index,
            "[{}/{}] Rebuilt online in {:.2}s",
            position,
            total,
            outcome.duration_secs
        ),
        RebuildStatus::SucceededOffline => warn!(
            index = %index,
            "[{}/{}] Rebuilt offline in {:.2}s",
            position,
            total,
            outcome.duration_secs
        ),
        RebuildStatus::Failed => error!(
            index = %index,
            "[{}/{}] Failed: {}",
            position,
            total,
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
