//! Matching ready operations to idle machines.
//!
//! # Algorithm
//!
//! Every (operation, machine) pair with a non-zero compatibility score is a
//! candidate. Candidates are sorted by job priority (descending), then
//! compatibility (descending), then IDs, and accepted greedily: each job
//! and each machine is used at most once per pass. Greedy, not optimal.
//!
//! The coordinator learns which jobs are ready only from
//! `JobStateChanged` notifications; it never polls job state.
//!
//! # Reference
//! Pinedo (2016), "Scheduling", Ch. 4: Dispatching Rules

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{EventBus, FabricationEvent};
use crate::models::{CapabilityRequirement, MachineSlot};

/// How well `machine` fits `requirement`.
///
/// 0 when the machine lacks the category or falls below the minimum.
/// Otherwise 1 plus a bonus in `[0, 1)` for level above the minimum; the
/// bonus stops growing at the optimal level when one is given.
pub fn compatibility(requirement: &CapabilityRequirement, machine: &MachineSlot) -> f64 {
    let Some(level) = machine.capability_level(&requirement.category) else {
        return 0.0;
    };
    if !requirement.accepts_level(level) {
        return 0.0;
    }
    let mut excess = (level - requirement.minimum).max(0.0);
    if let Some(optimal) = requirement.optimal {
        excess = excess.min((optimal - requirement.minimum).max(0.0));
    }
    1.0 + excess / (excess + requirement.minimum.max(1.0))
}

/// An operation that may start now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyOperation {
    pub job_id: String,
    pub facility_id: String,
    pub operation_index: usize,
    pub requirement: CapabilityRequirement,
    pub duration_ms: i64,
    /// Ready-queue score of the owning job.
    pub priority: f64,
}

/// A decided (operation, machine) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub job_id: String,
    pub facility_id: String,
    pub machine_id: String,
    pub operation_index: usize,
    pub estimated_duration_ms: i64,
    pub compatibility: f64,
}

/// Keeps the per-facility ready set and pairs work with machines.
#[derive(Debug, Clone, Default)]
pub struct JobAssignmentCoordinator {
    ready: BTreeMap<String, BTreeSet<String>>,
    dispatched: u64,
}

impl JobAssignmentCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a state notification to the ready set.
    pub fn notify(&mut self, event: &FabricationEvent) {
        match event {
            FabricationEvent::JobStateChanged {
                job_id,
                facility_id,
                ready,
                ..
            } => {
                let set = self.ready.entry(facility_id.clone()).or_default();
                if *ready {
                    set.insert(job_id.clone());
                } else {
                    set.remove(job_id);
                }
            }
            FabricationEvent::JobFinished {
                job_id, facility_id, ..
            } => {
                if let Some(set) = self.ready.get_mut(facility_id) {
                    set.remove(job_id);
                }
            }
            _ => {}
        }
    }

    /// Whether the job was last reported ready.
    pub fn is_ready(&self, facility_id: &str, job_id: &str) -> bool {
        self.ready
            .get(facility_id)
            .is_some_and(|set| set.contains(job_id))
    }

    /// Ready job IDs of a facility.
    pub fn ready_jobs(&self, facility_id: &str) -> impl Iterator<Item = &str> {
        self.ready
            .get(facility_id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Total dispatches decided so far.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched
    }

    /// Greedily pairs `candidates` with `idle` machines.
    ///
    /// Publishes one `JobStarted` per pairing. Starting the operation is
    /// left to whoever owns the job.
    pub fn assign(
        &mut self,
        candidates: &[ReadyOperation],
        idle: &[&MachineSlot],
        bus: &mut EventBus,
    ) -> Vec<Dispatch> {
        let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
        for (c, candidate) in candidates.iter().enumerate() {
            for (m, machine) in idle.iter().enumerate() {
                if !machine.is_idle() {
                    continue;
                }
                let score = compatibility(&candidate.requirement, machine);
                if score > 0.0 {
                    pairs.push((c, m, score));
                }
            }
        }

        pairs.sort_by(|a, b| {
            let (ca, cb) = (&candidates[a.0], &candidates[b.0]);
            cb.priority
                .partial_cmp(&ca.priority)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
                .then_with(|| ca.job_id.cmp(&cb.job_id))
                .then_with(|| ca.operation_index.cmp(&cb.operation_index))
                .then_with(|| idle[a.1].id.cmp(&idle[b.1].id))
        });

        let mut used_jobs: HashSet<&str> = HashSet::new();
        let mut used_machines: HashSet<&str> = HashSet::new();
        let mut dispatches = Vec::new();

        for (c, m, score) in pairs {
            let candidate = &candidates[c];
            let machine = idle[m];
            if used_jobs.contains(candidate.job_id.as_str())
                || used_machines.contains(machine.id.as_str())
            {
                continue;
            }
            used_jobs.insert(candidate.job_id.as_str());
            used_machines.insert(machine.id.as_str());

            debug!(
                job_id = %candidate.job_id,
                machine_id = %machine.id,
                operation_index = candidate.operation_index,
                compatibility = score,
                "operation dispatched"
            );
            bus.publish(FabricationEvent::JobStarted {
                job_id: candidate.job_id.clone(),
                facility_id: candidate.facility_id.clone(),
                machine_id: machine.id.clone(),
                operation_index: candidate.operation_index,
                estimated_duration_ms: candidate.duration_ms,
            });
            dispatches.push(Dispatch {
                job_id: candidate.job_id.clone(),
                facility_id: candidate.facility_id.clone(),
                machine_id: machine.id.clone(),
                operation_index: candidate.operation_index,
                estimated_duration_ms: candidate.duration_ms,
                compatibility: score,
            });
        }
        self.dispatched += dispatches.len() as u64;
        dispatches
    }
}
