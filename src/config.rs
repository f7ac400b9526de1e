//! Simulation configuration.
//!
//! All tunables live in one serde-friendly tree so hosts can load them from
//! JSON. Every field has a default; partial documents are accepted.
//!
//! ```
//! use u_fabricate::config::SimulationConfig;
//! use u_fabricate::models::ReservationMode;
//!
//! let config = SimulationConfig::from_json(r#"{ "seed": 7, "reservation_mode": "Dynamic" }"#)
//!     .unwrap();
//! assert_eq!(config.seed, 7);
//! assert_eq!(config.reservation_mode, ReservationMode::Dynamic);
//! assert!((config.workspace.downgrade_penalty - 0.85).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{FabricationError, Result};
use crate::models::{CapabilityRequirement, OperationKind, ReservationMode, Tier};

/// Top-level configuration for a [`Simulation`](crate::Simulation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for failure rolls.
    pub seed: u64,
    /// How jobs reserve facility stock.
    pub reservation_mode: ReservationMode,
    /// Execution tunables.
    pub workspace: WorkspaceConfig,
    /// Plan synthesis tunables.
    pub planning: PlanningConfig,
    /// Ready-queue scoring tunables.
    pub priority: PriorityConfig,
}

/// Execution-time tunables for the workspace manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Quality multiplier applied per downgrade failure (0.0..=1.0).
    pub downgrade_penalty: f64,
    /// Rework attempts allowed per operation before the job is scrapped.
    pub max_rework_attempts: u32,
}

/// Plan synthesis tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Upper bound of plan confidence.
    pub confidence_ceiling: f64,
    /// Lower bound of plan confidence.
    pub confidence_floor: f64,
    /// Relative discount per high-severity risk factor.
    pub high_risk_discount: f64,
    /// Absolute discount scaled by the freshly manufactured fraction.
    pub manufacture_discount: f64,
    /// Quality retained by salvaged components (0.0..=1.0).
    pub retention_factor: f64,
    /// Default failure probabilities per operation kind.
    pub failure: FailureDefaults,
    /// Default equipment requirement for shaping operations.
    pub shaping_capability: CapabilityRequirement,
    /// Default equipment requirement for assembly operations.
    pub assembly_capability: CapabilityRequirement,
    /// Default equipment requirement for disassembly operations.
    pub disassembly_capability: CapabilityRequirement,
}

/// Default failure probability per operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureDefaults {
    pub shaping: f64,
    pub assembly: f64,
    pub disassembly: f64,
}

/// Ready-queue scoring tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Base score for jobs producing raw materials.
    pub raw_value: f64,
    /// Base score for jobs producing shaped materials.
    pub shaped_value: f64,
    /// Base score for jobs producing assemblies.
    pub assembly_value: f64,
    /// Bonus for rush jobs.
    pub rush_bonus: f64,
}

impl SimulationConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FabricationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the reservation mode.
    pub fn with_reservation_mode(mut self, mode: ReservationMode) -> Self {
        self.reservation_mode = mode;
        self
    }

    /// Sets every default failure probability to zero.
    ///
    /// Treatment operations still carry `1 - success_probability`.
    pub fn without_default_failures(mut self) -> Self {
        self.planning.failure = FailureDefaults {
            shaping: 0.0,
            assembly: 0.0,
            disassembly: 0.0,
        };
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(FabricationError::Config(format!(
                    "{name} must be within 0..=1, got {v}"
                )))
            }
        };
        let planning = &self.planning;
        let fractions = [
            ("workspace.downgrade_penalty", self.workspace.downgrade_penalty),
            ("planning.confidence_ceiling", planning.confidence_ceiling),
            ("planning.confidence_floor", planning.confidence_floor),
            ("planning.retention_factor", planning.retention_factor),
            ("planning.failure.shaping", planning.failure.shaping),
            ("planning.failure.assembly", planning.failure.assembly),
            ("planning.failure.disassembly", planning.failure.disassembly),
        ];
        for (name, value) in fractions {
            unit(name, value)?;
        }
        if self.planning.confidence_floor > self.planning.confidence_ceiling {
            return Err(FabricationError::Config(
                "planning.confidence_floor exceeds planning.confidence_ceiling".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            reservation_mode: ReservationMode::Legacy,
            workspace: WorkspaceConfig::default(),
            planning: PlanningConfig::default(),
            priority: PriorityConfig::default(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            downgrade_penalty: 0.85,
            max_rework_attempts: 3,
        }
    }
}

impl PlanningConfig {
    /// Default failure probability for an operation kind.
    pub fn failure_probability(&self, kind: &OperationKind) -> f64 {
        match kind {
            OperationKind::Shaping => self.failure.shaping,
            OperationKind::Assembly => self.failure.assembly,
            OperationKind::Disassembly => self.failure.disassembly,
            // Treatments derive theirs from the condition profile.
            OperationKind::Treatment { .. } => 0.0,
        }
    }

    /// Default equipment requirement for a non-treatment operation kind.
    pub fn capability_for(&self, kind: &OperationKind) -> Option<&CapabilityRequirement> {
        match kind {
            OperationKind::Shaping => Some(&self.shaping_capability),
            OperationKind::Assembly => Some(&self.assembly_capability),
            OperationKind::Disassembly => Some(&self.disassembly_capability),
            OperationKind::Treatment { .. } => None,
        }
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            confidence_ceiling: 0.95,
            confidence_floor: 0.05,
            high_risk_discount: 0.10,
            manufacture_discount: 0.30,
            retention_factor: 0.85,
            failure: FailureDefaults::default(),
            shaping_capability: CapabilityRequirement::new("machining", 10.0),
            assembly_capability: CapabilityRequirement::new("assembly", 10.0),
            disassembly_capability: CapabilityRequirement::new("disassembly", 10.0),
        }
    }
}

impl Default for FailureDefaults {
    fn default() -> Self {
        Self {
            shaping: 0.02,
            assembly: 0.05,
            disassembly: 0.10,
        }
    }
}

impl PriorityConfig {
    /// Base score for a tier.
    pub fn tier_value(&self, tier: Tier) -> f64 {
        match tier {
            Tier::RawMaterial => self.raw_value,
            Tier::ShapedMaterial => self.shaped_value,
            Tier::Assembly => self.assembly_value,
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            raw_value: 10.0,
            shaped_value: 25.0,
            assembly_value: 50.0,
            rush_bonus: 50.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reservation_mode, ReservationMode::Legacy);
        assert_eq!(config.workspace.max_rework_attempts, 3);
    }

    #[test]
    fn test_partial_json() {
        let config = SimulationConfig::from_json(
            r#"{ "workspace": { "downgrade_penalty": 0.5 }, "priority": { "rush_bonus": 80.0 } }"#,
        )
        .unwrap();
        assert!((config.workspace.downgrade_penalty - 0.5).abs() < 1e-12);
        assert_eq!(config.workspace.max_rework_attempts, 3);
        assert!((config.priority.rush_bonus - 80.0).abs() < 1e-12);
        assert!((config.priority.assembly_value - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = SimulationConfig::from_json(r#"{ "planning": { "retention_factor": 1.5 } }"#)
            .unwrap_err();
        assert!(matches!(err, FabricationError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = SimulationConfig::from_json("{ seed: ").unwrap_err();
        assert!(matches!(err, FabricationError::Config(_)));
    }

    #[test]
    fn test_floor_above_ceiling() {
        let mut config = SimulationConfig::default();
        config.planning.confidence_floor = 0.99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_values() {
        let p = PriorityConfig::default();
        assert!((p.tier_value(Tier::Assembly) - 50.0).abs() < 1e-12);
        assert!((p.tier_value(Tier::RawMaterial) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_without_default_failures() {
        let config = SimulationConfig::default().without_default_failures();
        let failure = |kind| config.planning.failure_probability(&kind);
        assert_eq!(failure(OperationKind::Assembly), 0.0);
        assert_eq!(failure(OperationKind::Shaping), 0.0);
    }
}
