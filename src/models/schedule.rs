//! Execution log.
//!
//! Every machine run that ends (success, failure or skip) is recorded as an
//! [`Assignment`]. The log is the realized schedule of a simulation and the
//! input to KPI calculation.
//!
//! # Reference
//! Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems", Ch. 3

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Realized schedule: finished operation runs in completion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    /// Finished runs.
    pub assignments: Vec<Assignment>,
}

/// How a machine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OperationOutcome {
    /// Inputs consumed, outputs produced.
    Succeeded,
    /// Failed; job quality multiplied by a penalty, outputs produced.
    Downgraded { quality_multiplier: f64 },
    /// Failed; progress reset, materials kept.
    Reworked { attempt: u32 },
    /// Failed; job terminated.
    Scrapped,
    /// Conditional operation whose input was gone.
    Skipped,
    /// Machine removed mid-run; requeued.
    Interrupted,
}

impl OperationOutcome {
    /// Whether the run advanced the job's plan.
    pub fn advanced(&self) -> bool {
        matches!(
            self,
            OperationOutcome::Succeeded
                | OperationOutcome::Downgraded { .. }
                | OperationOutcome::Skipped
        )
    }
}

/// An operation-machine-time record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Plan operation id.
    pub operation_id: String,
    /// Owning job (denormalized for query convenience).
    pub job_id: String,
    /// Machine slot id.
    pub machine_id: String,
    /// Index into the job's plan.
    pub operation_index: usize,
    /// Start time (ms).
    pub start_ms: i64,
    /// End time (ms).
    pub end_ms: i64,
    /// How the run ended.
    pub outcome: OperationOutcome,
}

impl Assignment {
    /// Creates a successful record.
    pub fn new(
        operation_id: impl Into<String>,
        job_id: impl Into<String>,
        machine_id: impl Into<String>,
        start_ms: i64,
        end_ms: i64,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            job_id: job_id.into(),
            machine_id: machine_id.into(),
            operation_index: 0,
            start_ms,
            end_ms,
            outcome: OperationOutcome::Succeeded,
        }
    }

    /// Sets the plan index.
    pub fn with_index(mut self, index: usize) -> Self {
        self.operation_index = index;
        self
    }

    /// Sets the outcome.
    pub fn with_outcome(mut self, outcome: OperationOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Duration (end - start) in ms.
    #[inline]
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

impl Schedule {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn add_assignment(&mut self, assignment: Assignment) {
        self.assignments.push(assignment);
    }

    /// Makespan: latest end time across all records (ms).
    pub fn makespan_ms(&self) -> i64 {
        self.assignments.iter().map(|a| a.end_ms).max().unwrap_or(0)
    }

    /// Earliest start time across all records (ms).
    pub fn first_start_ms(&self) -> i64 {
        self.assignments
            .iter()
            .map(|a| a.start_ms)
            .min()
            .unwrap_or(0)
    }

    /// All records for a job.
    pub fn assignments_for_job(&self, job_id: &str) -> Vec<&Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.job_id == job_id)
            .collect()
    }

    /// All records for a machine.
    pub fn assignments_for_machine(&self, machine_id: &str) -> Vec<&Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.machine_id == machine_id)
            .collect()
    }

    /// Number of records with a given outcome kind.
    pub fn count_outcomes(&self, predicate: impl Fn(&OperationOutcome) -> bool) -> usize {
        self.assignments
            .iter()
            .filter(|a| predicate(&a.outcome))
            .count()
    }

    /// Machine utilization: busy_time / horizon.
    ///
    /// Returns `None` if `horizon_ms` is zero.
    pub fn machine_utilization(&self, machine_id: &str, horizon_ms: i64) -> Option<f64> {
        if horizon_ms <= 0 {
            return None;
        }
        let busy: i64 = self
            .assignments_for_machine(machine_id)
            .iter()
            .map(|a| a.duration_ms())
            .sum();
        Some(busy as f64 / horizon_ms as f64)
    }

    /// Utilization for every machine with records, using makespan as horizon.
    pub fn all_utilizations(&self) -> HashMap<String, f64> {
        let horizon = self.makespan_ms() - self.first_start_ms();
        if horizon <= 0 {
            return HashMap::new();
        }

        let mut machine_busy: HashMap<String, i64> = HashMap::new();
        for a in &self.assignments {
            *machine_busy.entry(a.machine_id.clone()).or_insert(0) += a.duration_ms();
        }

        machine_busy
            .into_iter()
            .map(|(id, busy)| (id, busy as f64 / horizon as f64))
            .collect()
    }

    /// Latest end of a job's records.
    pub fn job_completion_time(&self, job_id: &str) -> Option<i64> {
        self.assignments_for_job(job_id)
            .iter()
            .map(|a| a.end_ms)
            .max()
    }

    /// Number of records.
    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }
}
