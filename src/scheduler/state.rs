//! Job state evaluation.
//!
//! A job's state is a pure function of its sub-operations and what the
//! facility can offer right now:
//!
//! | Condition | State |
//! |-----------|-------|
//! | already terminal | unchanged |
//! | any sub-operation running | `IN_PROGRESS` |
//! | every sub-operation completed | `COMPLETED` |
//! | next operation ready, single-step plan | `READY_TO_START` |
//! | next operation ready, multi-step plan | `IN_PROGRESS` + ready |
//! | next operation lacks a capable machine only | `BLOCKED_BY_EQUIPMENT` |
//! | next operation lacks materials | `BLOCKED_BY_MATERIALS` |
//! | nothing can be evaluated | `BLOCKED_BY_DEPENDENCIES` |
//!
//! The manager re-evaluates on demand and publishes `JobStateChanged` only
//! when the state or the ready flag actually changes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::dispatching::{
    PriorityContext, PriorityEngine, PriorityInput, QueueEntry, ReadyQueue, RuleScore,
};
use crate::events::{EventBus, FabricationEvent};
use crate::models::{CapabilityRequirement, Job, JobState, SubOperationState};

/// What the facility can currently offer a job.
pub trait ReadinessSource {
    /// Whether operation `index` of `job` can obtain every input.
    fn materials_ready(&self, job: &Job, index: usize) -> bool;

    /// Whether the facility owns a machine meeting `requirement`.
    fn equipment_available(&self, requirement: &CapabilityRequirement) -> bool;
}

/// Result of evaluating one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvaluation {
    pub state: JobState,
    pub ready: bool,
    pub ready_operations: Vec<usize>,
    pub reason: Option<String>,
}

impl JobEvaluation {
    fn settled(state: JobState) -> Self {
        Self {
            state,
            ready: false,
            ready_operations: Vec::new(),
            reason: None,
        }
    }
}

/// Evaluates `job` without mutating anything.
///
/// Calling it twice with no intervening change returns equal results.
pub fn evaluate(job: &Job, view: &dyn ReadinessSource) -> JobEvaluation {
    if job.state.is_terminal() {
        return JobEvaluation::settled(job.state);
    }
    if job.all_completed() {
        return JobEvaluation::settled(JobState::Completed);
    }

    let running = !job.running_operations().is_empty();
    let pointer = job.operation_pointer();
    let (Some(op), Some(sub)) = (job.operation(pointer), job.sub_operations.get(pointer)) else {
        return JobEvaluation::settled(JobState::BlockedByDependencies);
    };

    if sub.state != SubOperationState::Queued || !job.predecessors_complete(pointer) {
        let state = if running {
            JobState::InProgress
        } else {
            JobState::BlockedByDependencies
        };
        return JobEvaluation::settled(state);
    }

    let has_equipment = view.equipment_available(&op.requirement);
    let has_materials = view.materials_ready(job, pointer);

    if has_equipment && has_materials {
        let state = if job.is_atomic() && !running {
            JobState::ReadyToStart
        } else {
            JobState::InProgress
        };
        return JobEvaluation {
            state,
            ready: true,
            ready_operations: vec![pointer],
            reason: None,
        };
    }

    let (blocked, reason) = if !has_materials {
        (
            JobState::BlockedByMaterials,
            format!("{}: inputs not obtainable", op.id),
        )
    } else {
        (
            JobState::BlockedByEquipment,
            format!(
                "{}: no machine offers {} >= {}",
                op.id, op.requirement.category, op.requirement.minimum
            ),
        )
    };
    JobEvaluation {
        state: if running { JobState::InProgress } else { blocked },
        ready: false,
        ready_operations: Vec::new(),
        reason: Some(reason),
    }
}

/// Tracks which jobs are ready, blocked, busy or finished.
#[derive(Debug, Clone)]
pub struct JobStateManager {
    engine: PriorityEngine,
    ready: ReadyQueue,
    blocked: BTreeMap<String, JobState>,
    active: BTreeSet<String>,
    finished: BTreeMap<String, JobState>,
    now_ms: i64,
}

impl JobStateManager {
    /// Creates a manager ranking ready jobs with `engine`.
    pub fn new(engine: PriorityEngine) -> Self {
        Self {
            engine,
            ready: ReadyQueue::new(),
            blocked: BTreeMap::new(),
            active: BTreeSet::new(),
            finished: BTreeMap::new(),
            now_ms: 0,
        }
    }

    /// Re-evaluates `job`, storing the result on it.
    ///
    /// Returns whether the state or ready flag changed; only then is
    /// `JobStateChanged` published.
    pub fn refresh(
        &mut self,
        job: &mut Job,
        view: &dyn ReadinessSource,
        bus: &mut EventBus,
        now_ms: i64,
    ) -> bool {
        if job.state.is_terminal() {
            return false;
        }
        self.now_ms = self.now_ms.max(now_ms);

        let evaluation = evaluate(job, view);
        let changed = evaluation.state != job.state || evaluation.ready != job.ready;

        job.state = evaluation.state;
        job.ready = evaluation.ready;
        job.ready_operations = evaluation.ready_operations;
        if evaluation.reason.is_some() {
            job.last_reason = evaluation.reason;
        }

        self.ready.remove(&job.id);
        self.blocked.remove(&job.id);
        self.active.remove(&job.id);
        if job.ready {
            let context = PriorityContext::at_time(self.now_ms);
            let input = PriorityInput::from_job(job);
            self.ready
                .push(job.facility_id.clone(), input, &self.engine, &context);
        } else if job.state.is_blocked() {
            self.blocked.insert(job.id.clone(), job.state);
        } else {
            self.active.insert(job.id.clone());
        }

        if changed {
            debug!(
                job_id = %job.id,
                state = %job.state,
                ready = job.ready,
                reason = job.last_reason.as_deref().unwrap_or(""),
                "job state changed"
            );
            bus.publish(FabricationEvent::JobStateChanged {
                job_id: job.id.clone(),
                facility_id: job.facility_id.clone(),
                state: job.state,
                ready: job.ready,
            });
        }
        changed
    }

    /// Moves a job to the finished set.
    pub fn on_job_finished(&mut self, job_id: &str, state: JobState) {
        self.ready.remove(job_id);
        self.blocked.remove(job_id);
        self.active.remove(job_id);
        self.finished.insert(job_id.to_string(), state);
    }

    /// Re-scores the ready queue at `now_ms`.
    pub fn resort(&mut self, now_ms: i64) {
        self.now_ms = self.now_ms.max(now_ms);
        self.ready
            .resort(&self.engine, &PriorityContext::at_time(self.now_ms));
    }

    /// Ready jobs of one facility, most urgent first.
    pub fn ready_jobs<'a>(
        &'a self,
        facility_id: &'a str,
    ) -> impl Iterator<Item = &'a QueueEntry> + 'a {
        self.ready.for_facility(facility_id)
    }

    /// Current score of a ready job.
    pub fn priority_score(&self, job_id: &str) -> Option<RuleScore> {
        self.ready.score_of(job_id)
    }

    /// Score `job` would receive at `now_ms`, ready or not.
    pub fn score_job(&self, job: &Job, now_ms: i64) -> RuleScore {
        let input = PriorityInput::from_job(job);
        self.engine.score(&input, &PriorityContext::at_time(now_ms))
    }

    /// Blocked jobs and why they are blocked.
    pub fn blocked_jobs(&self) -> impl Iterator<Item = (&str, JobState)> {
        self.blocked.iter().map(|(id, s)| (id.as_str(), *s))
    }

    /// Terminal state of a finished job.
    pub fn finished_state(&self, job_id: &str) -> Option<JobState> {
        self.finished.get(job_id).copied()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }
}

impl Default for JobStateManager {
    fn default() -> Self {
        Self::new(PriorityEngine::standard())
    }
}
