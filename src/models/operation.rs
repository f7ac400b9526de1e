//! Operation model.
//!
//! An operation is the atomic plan step: it requires one machine with a
//! given capability for a fixed duration, consumes materials from the job's
//! local inventory, and produces new instances into it.
//!
//! # Failure Model
//!
//! Each operation carries a failure probability and a [`FailurePolicy`]
//! resolved at completion time:
//! - **Scrap**: the job terminates as FAILED.
//! - **Downgrade**: the job's output quality is multiplied by a penalty.
//! - **Rework**: progress resets; materials are kept.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{CapabilityRequirement, Condition, ItemFilter};

/// Closed set of operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Removes a damage condition from an input item.
    Treatment { condition: Condition },
    /// Breaks an assembly into salvaged components.
    Disassembly,
    /// Turns raw materials into a shaped material.
    Shaping,
    /// Joins components into one unit.
    Assembly,
}

impl OperationKind {
    /// Short label used in operation ids and logs.
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Treatment { .. } => "treat",
            OperationKind::Disassembly => "disassemble",
            OperationKind::Shaping => "shape",
            OperationKind::Assembly => "assemble",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Treatment { condition } => write!(f, "treat({condition})"),
            other => f.write_str(other.label()),
        }
    }
}

/// What happens when an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    Scrap,
    Downgrade,
    Rework,
}

/// Labor classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaborClass {
    /// Runs unattended.
    Automated,
    /// Needs a trained operator.
    Technician,
    /// Needs a specialist (repair, precision assembly).
    Specialist,
}

/// Material consumed or produced by an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSpec {
    /// Base item id.
    pub item_id: String,
    /// Units.
    pub quantity: u32,
    /// Consumption: required tags. Production: tags applied.
    pub tags: Vec<String>,
    /// Consumption: highest accepted quality. Production: output cap.
    pub quality_ceiling: Option<f64>,
    /// Production only: fixed output quality. `None` derives it from inputs.
    pub quality: Option<f64>,
}

impl MaterialSpec {
    /// Creates an untagged spec.
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            tags: Vec::new(),
            quality_ceiling: None,
            quality: None,
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Replaces all tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the quality ceiling.
    pub fn with_quality_ceiling(mut self, ceiling: Option<f64>) -> Self {
        self.quality_ceiling = ceiling;
        self
    }

    /// Sets a fixed output quality.
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality.clamp(0.0, 100.0));
        self
    }

    /// Filter selecting instances this spec may consume.
    pub fn filter(&self) -> ItemFilter<'_> {
        ItemFilter {
            item_id: &self.item_id,
            tags: &self.tags,
            quality_ceiling: self.quality_ceiling,
        }
    }

    /// Whether instances produced by `self` satisfy consumption spec `consumer`.
    pub fn feeds(&self, consumer: &MaterialSpec) -> bool {
        self.item_id == consumer.item_id && consumer.tags.iter().all(|t| self.tags.contains(t))
    }
}

/// Atomic plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique id within the plan.
    pub id: String,
    /// Kind (closed variant).
    pub kind: OperationKind,
    /// Required machine capability.
    pub requirement: CapabilityRequirement,
    /// Processing time (ms).
    pub duration_ms: i64,
    /// Inputs taken from the job's local inventory at completion.
    pub consumes: Vec<MaterialSpec>,
    /// Outputs deposited into the job's local inventory at completion.
    pub produces: Vec<MaterialSpec>,
    /// Probability (0..=1) that the operation fails.
    pub failure_probability: f64,
    /// Resolution applied on failure.
    pub failure_policy: FailurePolicy,
    /// Labor classification.
    pub labor: LaborClass,
    /// Why the operation exists (gap, input item, ...).
    pub note: String,
    /// Skipped when its inputs are no longer present.
    pub conditional: bool,
}

impl Operation {
    /// Creates an operation with no materials and a zero-minimum requirement.
    pub fn new(
        id: impl Into<String>,
        kind: OperationKind,
        requirement: CapabilityRequirement,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            requirement,
            duration_ms: 0,
            consumes: Vec::new(),
            produces: Vec::new(),
            failure_probability: 0.0,
            failure_policy: FailurePolicy::Rework,
            labor: LaborClass::Technician,
            note: String::new(),
            conditional: false,
        }
    }

    /// Sets the duration.
    pub fn with_duration(mut self, ms: i64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// Adds a consumed material.
    pub fn consuming(mut self, spec: MaterialSpec) -> Self {
        self.consumes.push(spec);
        self
    }

    /// Adds a produced material.
    pub fn producing(mut self, spec: MaterialSpec) -> Self {
        self.produces.push(spec);
        self
    }

    /// Sets the failure probability and policy.
    pub fn with_failure(mut self, probability: f64, policy: FailurePolicy) -> Self {
        self.failure_probability = probability.clamp(0.0, 1.0);
        self.failure_policy = policy;
        self
    }

    /// Sets the labor class.
    pub fn with_labor(mut self, labor: LaborClass) -> Self {
        self.labor = labor;
        self
    }

    /// Sets the provenance note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Marks the operation as conditional.
    pub fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }

    /// Whether this operation produces `item_id` (any tags).
    pub fn produces_item(&self, item_id: &str) -> bool {
        self.produces.iter().any(|p| p.item_id == item_id)
    }
}
