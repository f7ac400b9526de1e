//! Production performance indicators.
//!
//! Computed from the execution log and the finished jobs.
//!
//! # Metrics
//!
//! | Metric | Definition |
//! |--------|-----------|
//! | Makespan (C_max) | Latest run end |
//! | Avg Utilization | Mean machine busy time over the log's horizon |
//! | Avg Flow Time | Mean time from job creation to completion |
//! | Yield | Completed / (completed + failed) |
//! | Rework / Scrap | Runs ending in rework or scrap |
//!
//! # Reference
//! Pinedo (2016), "Scheduling", Ch. 1.2: Performance Measures

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{Job, JobState, OperationOutcome, Schedule};

/// Production performance indicators.
///
/// All time values are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionKpi {
    pub makespan_ms: i64,
    pub avg_utilization: f64,
    pub utilization_by_machine: HashMap<String, f64>,
    pub avg_flow_time_ms: f64,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    /// Fraction of decided jobs that completed (1.0 when none decided).
    pub yield_rate: f64,
    pub rework_runs: usize,
    pub scrapped_runs: usize,
    pub skipped_operations: usize,
    pub interrupted_runs: usize,
}

impl ProductionKpi {
    /// Computes KPIs from the execution log and the jobs it covers.
    ///
    /// Non-terminal jobs are ignored for the job counts.
    pub fn calculate<'a>(schedule: &Schedule, jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut cancelled = 0usize;
        let mut total_flow_time = 0.0;

        for job in jobs {
            match job.state {
                JobState::Completed => {
                    completed += 1;
                    if let Some(finished) = job.finished_at_ms {
                        total_flow_time += (finished - job.created_at_ms) as f64;
                    }
                }
                JobState::Failed => failed += 1,
                JobState::Cancelled => cancelled += 1,
                _ => {}
            }
        }

        let utilization_by_machine = schedule.all_utilizations();
        let avg_utilization = if utilization_by_machine.is_empty() {
            0.0
        } else {
            let sum: f64 = utilization_by_machine.values().sum();
            sum / utilization_by_machine.len() as f64
        };

        let decided = completed + failed;
        let yield_rate = if decided == 0 {
            1.0
        } else {
            completed as f64 / decided as f64
        };

        let avg_flow_time_ms = if completed == 0 {
            0.0
        } else {
            total_flow_time / completed as f64
        };

        Self {
            makespan_ms: schedule.makespan_ms(),
            avg_utilization,
            utilization_by_machine,
            avg_flow_time_ms,
            completed_jobs: completed,
            failed_jobs: failed,
            cancelled_jobs: cancelled,
            yield_rate,
            rework_runs: schedule
                .count_outcomes(|o| matches!(o, OperationOutcome::Reworked { .. })),
            scrapped_runs: schedule.count_outcomes(|o| matches!(o, OperationOutcome::Scrapped)),
            skipped_operations: schedule.count_outcomes(|o| matches!(o, OperationOutcome::Skipped)),
            interrupted_runs: schedule
                .count_outcomes(|o| matches!(o, OperationOutcome::Interrupted)),
        }
    }

    /// Whether the run meets the given quality thresholds.
    pub fn meets_thresholds(&self, min_yield: f64, min_utilization: f64) -> bool {
        self.yield_rate >= min_yield && self.avg_utilization >= min_utilization
    }
}
