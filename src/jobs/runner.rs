use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::storage::StoreError;

/// Result of asking a runner to execute its job once.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { detail: String },
    /// The previous run was still executing; nothing was started.
    Skipped,
    Failed { error: String },
}

/// Bookkeeping for the most recent finished run, surfaced on the status
/// endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub finished_at: String,
    pub outcome: String,
}

/// Wraps a batch job's `run_once` with single-flight semantics.
///
/// Both the in-process interval loop and the admin trigger endpoint go
/// through the same runner, so a job never runs concurrently with itself
/// no matter who fires it.
pub struct JobRunner {
    name: &'static str,
    running: Mutex<()>,
    last_run: Mutex<Option<LastRun>>,
}

impl JobRunner {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(()),
            last_run: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn last_run(&self) -> Option<LastRun> {
        self.last_run.lock().clone()
    }

    /// Execute the job unless a run is already in flight.
    pub fn try_run<F>(&self, job: F) -> RunOutcome
    where
        F: FnOnce() -> Result<String, StoreError>,
    {
        let Some(_guard) = self.running.try_lock() else {
            warn!(job = self.name, "Previous run still executing, skipping");
            return RunOutcome::Skipped;
        };

        info!(job = self.name, "Job run starting");
        let outcome = match job() {
            Ok(detail) => {
                info!(job = self.name, detail = %detail, "Job run finished");
                RunOutcome::Completed { detail }
            }
            Err(err) => {
                error!(job = self.name, error = %err, "Job run failed");
                RunOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        let summary = match &outcome {
            RunOutcome::Completed { detail } => detail.clone(),
            RunOutcome::Failed { error } => format!("failed: {}", error),
            RunOutcome::Skipped => unreachable!("skipped runs return early"),
        };
        *self.last_run.lock() = Some(LastRun {
            finished_at: Utc::now().format(crate::storage::SQL_TIME_FORMAT).to_string(),
            outcome: summary,
        });

        outcome
    }
}

/// Drive a runner on a fixed cadence. The immediate first tick is consumed,
/// so the first scheduled run lands one full period after startup; overdue
/// ticks are skipped rather than bunched.
pub async fn drive<F>(runner: Arc<JobRunner>, period: Duration, job: F)
where
    F: Fn() -> Result<String, StoreError>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        runner.try_run(&job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_runs_record_their_detail() {
        let runner = JobRunner::new("detection");
        let outcome = runner.try_run(|| Ok("3 findings".to_string()));
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(runner.last_run().unwrap().outcome, "3 findings");
    }

    #[test]
    fn failures_propagate_and_are_recorded() {
        let runner = JobRunner::new("detection");
        let outcome =
            runner.try_run(|| Err(StoreError::Unavailable("disk gone".to_string())));
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert!(runner.last_run().unwrap().outcome.contains("disk gone"));
    }

    #[test]
    fn overlapping_runs_are_skipped() {
        let runner = Arc::new(JobRunner::new("retention"));
        let inner = runner.clone();

        let outcome = runner.try_run(move || {
            // A second trigger while this run holds the slot must skip.
            assert!(matches!(
                inner.try_run(|| Ok("nested".to_string())),
                RunOutcome::Skipped
            ));
            Ok("outer".to_string())
        });
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        // The slot is free again afterwards.
        assert!(matches!(
            runner.try_run(|| Ok("again".to_string())),
            RunOutcome::Completed { .. }
        ));
    }
}
