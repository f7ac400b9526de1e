//! Manufacturing plan model.
//!
//! A plan is an ordered operation list. Dependencies are implicit: an
//! operation depends on every earlier operation producing something it
//! consumes (same item, produced tags covering the consumed tags).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{MaterialSpec, Operation};

/// An ordered, dependency-correct list of operations producing a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManufacturingPlan {
    /// Target item id.
    pub target_id: String,
    /// Target units.
    pub target_quantity: u32,
    /// Operations in execution order.
    pub operations: Vec<Operation>,
    /// Sum of operation durations (ms).
    pub total_duration_ms: i64,
    /// Net raw materials drawn from stock (item id → units).
    pub raw_requirements: BTreeMap<String, u32>,
    /// Heuristic success estimate (0..=1).
    pub confidence: f64,
}

impl ManufacturingPlan {
    /// Creates an empty plan for a target.
    pub fn new(target_id: impl Into<String>, target_quantity: u32) -> Self {
        Self {
            target_id: target_id.into(),
            target_quantity,
            operations: Vec::new(),
            total_duration_ms: 0,
            raw_requirements: BTreeMap::new(),
            confidence: 1.0,
        }
    }

    /// Appends an operation and updates the total duration.
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.push(operation);
        self
    }

    /// Sets the confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Sets a raw requirement.
    pub fn with_raw_requirement(mut self, item_id: impl Into<String>, quantity: u32) -> Self {
        self.raw_requirements.insert(item_id.into(), quantity);
        self
    }

    /// Appends an operation and updates the total duration.
    pub fn push(&mut self, operation: Operation) {
        self.total_duration_ms = self.total_duration_ms.saturating_add(operation.duration_ms);
        self.operations.push(operation);
    }

    /// Number of operations.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Whether the plan has exactly one operation.
    pub fn is_atomic(&self) -> bool {
        self.operations.len() == 1
    }

    /// Whether any operation produces `item_id`.
    pub fn produces_item(&self, item_id: &str) -> bool {
        self.operations.iter().any(|op| op.produces_item(item_id))
    }

    /// For each operation, the indices of operations feeding it.
    ///
    /// A consumed material resolves to its earlier producers. Only when none
    /// precede the consumer are later producers linked, which is how a
    /// misordered plan shows up as a cycle.
    pub fn dependencies(&self) -> Vec<Vec<usize>> {
        self.operations
            .iter()
            .enumerate()
            .map(|(c, consumer)| {
                let mut deps: Vec<usize> = Vec::new();
                for need in &consumer.consumes {
                    let feeding: Vec<usize> = self
                        .operations
                        .iter()
                        .enumerate()
                        .filter(|(p, producer)| {
                            *p != c && producer.produces.iter().any(|out| out.feeds(need))
                        })
                        .map(|(p, _)| p)
                        .collect();
                    let earlier: Vec<usize> = feeding.iter().copied().filter(|&p| p < c).collect();
                    deps.extend(if earlier.is_empty() { feeding } else { earlier });
                }
                deps.sort_unstable();
                deps.dedup();
                deps
            })
            .collect()
    }

    /// Consumption not covered by earlier operations in the plan.
    ///
    /// Walks operations in order, crediting production per item id, and
    /// returns the uncovered remainder of each consumption spec.
    pub fn external_inputs(&self) -> Vec<MaterialSpec> {
        self.external_inputs_where(|_| true)
    }

    /// Like [`external_inputs`](Self::external_inputs), restricted to the
    /// operations whose index passes `include`.
    pub fn external_inputs_where(&self, include: impl Fn(usize) -> bool) -> Vec<MaterialSpec> {
        let mut pool: HashMap<&str, u32> = HashMap::new();
        let mut external: Vec<MaterialSpec> = Vec::new();

        for (index, op) in self.operations.iter().enumerate() {
            if !include(index) {
                continue;
            }
            for need in &op.consumes {
                let internal = pool.entry(need.item_id.as_str()).or_insert(0);
                let covered = (*internal).min(need.quantity);
                *internal -= covered;
                let missing = need.quantity - covered;
                if missing == 0 {
                    continue;
                }
                if let Some(existing) = external.iter_mut().find(|e| {
                    e.item_id == need.item_id
                        && e.tags == need.tags
                        && e.quality_ceiling == need.quality_ceiling
                }) {
                    existing.quantity = existing.quantity.saturating_add(missing);
                } else {
                    let mut spec = need.clone();
                    spec.quantity = missing;
                    spec.quality = None;
                    external.push(spec);
                }
            }
            for out in &op.produces {
                let produced = pool.entry(out.item_id.as_str()).or_insert(0);
                *produced = produced.saturating_add(out.quantity);
            }
        }
        external
    }
}
