//! Priority-ordered ready queue.
//!
//! Entries keep the score they were inserted with. Scores drift as jobs
//! age; [`ReadyQueue::resort`] recomputes them in place and re-sorts
//! without removing and reinserting entries.

use serde::{Deserialize, Serialize};

use super::{PriorityContext, PriorityEngine, PriorityInput, RuleScore};

/// One queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Owning facility.
    pub facility_id: String,
    /// Rule inputs.
    pub input: PriorityInput,
    /// Last computed score.
    pub score: RuleScore,
}

/// Jobs ordered by descending score, ties by job ID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadyQueue {
    entries: Vec<QueueEntry>,
    scored_at_ms: i64,
}

impl ReadyQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or re-scores a job, keeping order.
    pub fn push(
        &mut self,
        facility_id: impl Into<String>,
        input: PriorityInput,
        engine: &PriorityEngine,
        context: &PriorityContext,
    ) {
        self.remove(&input.job_id);
        let score = engine.score(&input, context);
        let position = self
            .entries
            .iter()
            .position(|e| {
                engine.compare((score, &input.job_id), (e.score, &e.input.job_id))
                    == std::cmp::Ordering::Less
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            QueueEntry {
                facility_id: facility_id.into(),
                input,
                score,
            },
        );
    }

    /// Removes a job. Returns whether it was queued.
    pub fn remove(&mut self, job_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.input.job_id != job_id);
        self.entries.len() != before
    }

    /// Whether a job is queued.
    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.iter().any(|e| e.input.job_id == job_id)
    }

    /// Recomputes every score at `context` time and re-sorts in place.
    ///
    /// A no-op when the queue was already scored at that time.
    pub fn resort(&mut self, engine: &PriorityEngine, context: &PriorityContext) {
        if context.current_time_ms == self.scored_at_ms {
            return;
        }
        for entry in self.entries.iter_mut() {
            entry.score = engine.score(&entry.input, context);
        }
        self.entries.sort_by(|a, b| {
            engine.compare((a.score, &a.input.job_id), (b.score, &b.input.job_id))
        });
        self.scored_at_ms = context.current_time_ms;
    }

    /// Score of a queued job.
    pub fn score_of(&self, job_id: &str) -> Option<RuleScore> {
        self.entries
            .iter()
            .find(|e| e.input.job_id == job_id)
            .map(|e| e.score)
    }

    /// Entries in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Job IDs for one facility, in priority order.
    pub fn for_facility<'a>(
        &'a self,
        facility_id: &'a str,
    ) -> impl Iterator<Item = &'a QueueEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.facility_id == facility_id)
    }

    /// Most urgent entry.
    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
