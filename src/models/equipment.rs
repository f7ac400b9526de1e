//! Equipment definitions and capability tags.
//!
//! Equipment exposes capability tags: a category plus a numeric level or a
//! boolean flag. Operations declare a [`CapabilityRequirement`] (category,
//! minimum, optional optimal level) that machines are matched against.
//!
//! Storage-only equipment (shelves, bins) never becomes a machine slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{FabricationError, Result};

/// Whether a capability performs work or only holds stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// Performs operations (machining, welding, assembly, ...).
    Process,
    /// Holds materials; never schedulable.
    Storage,
}

/// Value of a capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CapabilityValue {
    /// Graded capability (higher = better).
    Level(f64),
    /// Present / absent.
    Flag(bool),
}

impl CapabilityValue {
    /// Numeric view: flags map to 1.0 / 0.0.
    pub fn as_level(self) -> f64 {
        match self {
            CapabilityValue::Level(v) => v,
            CapabilityValue::Flag(true) => 1.0,
            CapabilityValue::Flag(false) => 0.0,
        }
    }
}

/// A (category, value) pair describing what equipment can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability category (e.g., "machining", "welding").
    pub category: String,
    /// Process or storage.
    pub kind: CapabilityKind,
    /// Level or flag.
    pub value: CapabilityValue,
}

impl Capability {
    /// A graded process capability.
    pub fn level(category: impl Into<String>, level: f64) -> Self {
        Self {
            category: category.into(),
            kind: CapabilityKind::Process,
            value: CapabilityValue::Level(level),
        }
    }

    /// A boolean process capability.
    pub fn flag(category: impl Into<String>, present: bool) -> Self {
        Self {
            category: category.into(),
            kind: CapabilityKind::Process,
            value: CapabilityValue::Flag(present),
        }
    }

    /// A storage capability.
    pub fn storage(category: impl Into<String>, capacity: f64) -> Self {
        Self {
            category: category.into(),
            kind: CapabilityKind::Storage,
            value: CapabilityValue::Level(capacity),
        }
    }

    /// Whether this capability performs work.
    pub fn is_process(&self) -> bool {
        self.kind == CapabilityKind::Process
    }
}

const LEVEL_TOLERANCE: f64 = 1e-9;

/// Equipment capability required by an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequirement {
    /// Required category.
    pub category: String,
    /// Minimum level (flags count as 1.0).
    pub minimum: f64,
    /// Level beyond which better equipment brings no further benefit.
    pub optimal: Option<f64>,
}

impl CapabilityRequirement {
    /// Creates a requirement.
    pub fn new(category: impl Into<String>, minimum: f64) -> Self {
        Self {
            category: category.into(),
            minimum,
            optimal: None,
        }
    }

    /// Sets the optimal level.
    pub fn with_optimal(mut self, optimal: f64) -> Self {
        self.optimal = Some(optimal);
        self
    }

    /// Whether `level` reaches the minimum, within float tolerance.
    pub fn accepts_level(&self, level: f64) -> bool {
        level + LEVEL_TOLERANCE >= self.minimum
    }

    /// Whether any of `capabilities` meets this requirement.
    pub fn satisfied_by(&self, capabilities: &[Capability]) -> bool {
        capabilities.iter().any(|c| {
            c.is_process() && c.category == self.category && self.accepts_level(c.value.as_level())
        })
    }
}

/// Catalog definition of a piece of equipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentDefinition {
    /// Unique equipment id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Capability tags.
    pub capabilities: Vec<Capability>,
}

impl EquipmentDefinition {
    /// Creates an equipment definition without capabilities.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capabilities: Vec::new(),
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Whether this equipment exposes at least one process capability.
    pub fn is_processing(&self) -> bool {
        self.capabilities.iter().any(Capability::is_process)
    }
}

/// Read-only catalog of equipment definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquipmentCatalog {
    equipment: HashMap<String, EquipmentDefinition>,
}

impl EquipmentCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition (builder).
    pub fn with_equipment(mut self, definition: EquipmentDefinition) -> Self {
        self.insert(definition);
        self
    }

    /// Adds or replaces a definition.
    pub fn insert(&mut self, definition: EquipmentDefinition) {
        self.equipment.insert(definition.id.clone(), definition);
    }

    /// Looks up a definition.
    pub fn get(&self, id: &str) -> Result<&EquipmentDefinition> {
        self.equipment
            .get(id)
            .ok_or_else(|| FabricationError::UnknownEquipment(id.to_string()))
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.equipment.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.equipment.is_empty()
    }
}
