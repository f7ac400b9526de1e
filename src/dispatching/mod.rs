//! Priority rules and the ready queue.
//!
//! A job's ready-queue score is a weighted sum of composable priority
//! rules. The default engine scores
//!
//! ```text
//! score = tier base value + (rush bonus if rush) + age in hours
//! ```
//!
//! # Usage
//!
//! ```
//! use u_fabricate::dispatching::{PriorityContext, PriorityEngine, PriorityInput};
//! use u_fabricate::models::Tier;
//!
//! let engine = PriorityEngine::standard();
//! let job = PriorityInput::new("JOB-1", Tier::Assembly).with_rush(true);
//! let score = engine.score(&job, &PriorityContext::at_time(7_200_000));
//! assert!((score - 102.0).abs() < 1e-9);
//! ```
//!
//! # References
//!
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems", Ch. 4
//! - Haupt (1989), "A Survey of Priority Rule-Based Scheduling"

mod context;
mod engine;
mod queue;
pub mod rules;

pub use context::PriorityContext;
pub use engine::PriorityEngine;
pub use queue::{QueueEntry, ReadyQueue};

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::models::{Job, Tier};

/// Score returned by a priority rule.
///
/// Higher scores = more urgent (served first).
pub type RuleScore = f64;

/// Job attributes the rules look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityInput {
    /// Job id (final tie-break).
    pub job_id: String,
    /// Tier of the job's target.
    pub tier: Tier,
    /// Rush flag.
    pub rush: bool,
    /// Creation time (ms).
    pub created_at_ms: i64,
    /// Caller-assigned priority.
    pub manual_priority: i32,
}

impl PriorityInput {
    /// Creates an input created at t=0.
    pub fn new(job_id: impl Into<String>, tier: Tier) -> Self {
        Self {
            job_id: job_id.into(),
            tier,
            rush: false,
            created_at_ms: 0,
            manual_priority: 0,
        }
    }

    /// Sets the rush flag.
    pub fn with_rush(mut self, rush: bool) -> Self {
        self.rush = rush;
        self
    }

    /// Sets the creation time.
    pub fn created_at(mut self, ms: i64) -> Self {
        self.created_at_ms = ms;
        self
    }

    /// Sets the caller priority.
    pub fn with_manual_priority(mut self, priority: i32) -> Self {
        self.manual_priority = priority;
        self
    }

    /// Snapshot of a job.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            tier: job.target_tier,
            rush: job.rush,
            created_at_ms: job.created_at_ms,
            manual_priority: job.priority,
        }
    }
}

/// A rule contributing to a job's ready-queue score.
///
/// # Score Convention
/// **Higher score = more urgent.**
pub trait PriorityRule: Send + Sync + Debug {
    /// Rule name (e.g., "TIER", "RUSH").
    fn name(&self) -> &'static str;

    /// Evaluates a job at the context's time.
    fn evaluate(&self, input: &PriorityInput, context: &PriorityContext) -> RuleScore;

    /// Rule description.
    fn description(&self) -> &'static str {
        self.name()
    }
}
