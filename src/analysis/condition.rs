//! Condition analysis of damaged input items.
//!
//! For each input instance the analyzer reports its conditions, the
//! treatments needed (in prerequisite-respecting precedence order), the
//! components expected back, and the risks of using it.
//!
//! # Recovery Model
//!
//! An assembly input is disassembled. Each recipe component comes back at
//!
//! ```text
//! rate     = max(quality / 100, 0.25) × Π condition_yield
//! expected = floor(component_qty × input_qty × rate)
//! quality  = input_quality × retention (× 0.9 if worn)
//! ```
//!
//! A non-assembly input recovers itself once treated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::PlanningConfig;
use crate::error::Result;
use crate::models::{
    CapabilityRequirement, Condition, ItemCatalog, ItemInstance, LaborClass, Tier, SALVAGED_TAG,
};

/// Lowest recovery rate regardless of quality.
const MIN_RECOVERY_RATE: f64 = 0.25;
/// Extra quality loss on worn salvage.
const WEAR_QUALITY_FACTOR: f64 = 0.9;
/// Quality below which yield becomes a high-severity risk.
const LOW_QUALITY_THRESHOLD: f64 = 30.0;

/// How to treat one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentProfile {
    /// Equipment needed.
    pub requirement: CapabilityRequirement,
    /// Processing time per unit (ms).
    pub duration_per_unit_ms: i64,
    /// Chance the treatment succeeds (0..=1).
    pub success_probability: f64,
    /// Labor class.
    pub labor: LaborClass,
}

/// A treatment the input needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentStep {
    /// Condition removed.
    pub condition: Condition,
    /// Equipment needed.
    pub requirement: CapabilityRequirement,
    /// Total processing time (ms).
    pub duration_ms: i64,
    /// Chance the treatment succeeds (0..=1).
    pub success_probability: f64,
    /// Labor class.
    pub labor: LaborClass,
}

/// A component predicted to come back from an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecovery {
    /// Recovered item id.
    pub item_id: String,
    /// Expected units.
    pub expected_quantity: u32,
    /// Expected quality.
    pub quality: f64,
    /// Prediction confidence (0..=1).
    pub confidence: f64,
    /// Tags the recovered instances carry.
    pub tags: Vec<String>,
    /// Quality cap applied when the instances are produced.
    pub quality_ceiling: Option<f64>,
}

/// Risk severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

/// What a risk affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskImpact {
    Quality,
    Yield,
    Schedule,
    Safety,
}

/// A risk attached to an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Short description.
    pub description: String,
    /// Likelihood (0..=1).
    pub probability: f64,
    pub severity: RiskSeverity,
    pub impact: RiskImpact,
}

/// Analysis of one input instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionAnalysis {
    /// Input item id.
    pub item_id: String,
    /// Input units.
    pub quantity: u32,
    /// Input quality.
    pub quality: f64,
    /// Input tier.
    pub tier: Tier,
    /// Detected conditions, in precedence order.
    pub conditions: Vec<Condition>,
    /// Treatments in execution order.
    pub treatments: Vec<TreatmentStep>,
    /// Predicted recoveries.
    pub recoveries: Vec<ComponentRecovery>,
    /// Risks.
    pub risks: Vec<RiskFactor>,
}

impl ConditionAnalysis {
    /// Number of high-severity risks.
    pub fn high_risk_count(&self) -> usize {
        self.risks
            .iter()
            .filter(|r| r.severity == RiskSeverity::High)
            .count()
    }

    /// Whether the input is disassembled.
    pub fn is_disassembled(&self) -> bool {
        self.tier == Tier::Assembly
    }
}

/// Inspects input items and predicts what they yield.
#[derive(Debug, Clone)]
pub struct ConditionAnalyzer {
    profiles: BTreeMap<Condition, TreatmentProfile>,
    retention_factor: f64,
    disassembly_failure: f64,
}

impl ConditionAnalyzer {
    /// Creates an analyzer with the default treatment profiles.
    pub fn new(retention_factor: f64) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            Condition::Contaminated,
            TreatmentProfile {
                requirement: CapabilityRequirement::new("cleaning", 1.0),
                duration_per_unit_ms: 300_000,
                success_probability: 0.9,
                labor: LaborClass::Automated,
            },
        );
        profiles.insert(
            Condition::Corroded,
            TreatmentProfile {
                requirement: CapabilityRequirement::new("surface_treatment", 5.0),
                duration_per_unit_ms: 600_000,
                success_probability: 0.85,
                labor: LaborClass::Technician,
            },
        );
        profiles.insert(
            Condition::Cracked,
            TreatmentProfile {
                requirement: CapabilityRequirement::new("welding", 10.0).with_optimal(20.0),
                duration_per_unit_ms: 900_000,
                success_probability: 0.75,
                labor: LaborClass::Specialist,
            },
        );
        Self {
            profiles,
            retention_factor: retention_factor.clamp(0.0, 1.0),
            disassembly_failure: 0.0,
        }
    }

    /// Creates an analyzer from planning settings.
    pub fn from_config(config: &PlanningConfig) -> Self {
        let mut analyzer = Self::new(config.retention_factor);
        analyzer.disassembly_failure = config.failure.disassembly;
        analyzer
    }

    /// Replaces the profile for a condition.
    pub fn with_profile(mut self, condition: Condition, profile: TreatmentProfile) -> Self {
        self.profiles.insert(condition, profile);
        self
    }

    /// Treatment profile for a condition.
    pub fn profile(&self, condition: Condition) -> Option<&TreatmentProfile> {
        self.profiles.get(&condition)
    }

    /// Orders treatable conditions by precedence, holding each back until
    /// its present prerequisites are scheduled.
    pub fn treatment_order(conditions: &[Condition]) -> Vec<Condition> {
        let mut pending: Vec<Condition> = conditions
            .iter()
            .copied()
            .filter(|c| c.needs_treatment())
            .collect();
        pending.sort();
        pending.dedup();

        let mut ordered = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let next = pending
                .iter()
                .position(|c| {
                    c.prerequisites()
                        .iter()
                        .all(|p| !pending.contains(p) || ordered.contains(p))
                })
                // Prerequisites are acyclic; fall back to precedence anyway.
                .unwrap_or(0);
            ordered.push(pending.remove(next));
        }
        ordered
    }

    /// Analyzes one input instance.
    pub fn analyze(
        &self,
        catalog: &ItemCatalog,
        input: &ItemInstance,
    ) -> Result<ConditionAnalysis> {
        let base = catalog.get(&input.item_id)?;
        let conditions = input.conditions();

        let treatments = Self::treatment_order(&conditions)
            .into_iter()
            .filter_map(|condition| {
                self.profiles.get(&condition).map(|p| TreatmentStep {
                    condition,
                    requirement: p.requirement.clone(),
                    duration_ms: p.duration_per_unit_ms * i64::from(input.quantity),
                    success_probability: p.success_probability,
                    labor: p.labor,
                })
            })
            .collect::<Vec<_>>();

        // Tags left once every treatment has run.
        let remaining_tags: Vec<String> = input
            .tags
            .iter()
            .filter(|t| {
                Condition::from_tag(t).map_or(true, |c| !c.needs_treatment())
            })
            .cloned()
            .collect();

        let mut recoveries = Vec::new();
        if base.tier == Tier::Assembly {
            let rate = recovery_rate(input.quality, &conditions);
            let mut quality = input.quality * self.retention_factor;
            if conditions.contains(&Condition::Worn) {
                quality *= WEAR_QUALITY_FACTOR;
            }
            for component in &base.recipe {
                // Verify the component is cataloged.
                catalog.get(&component.item_id)?;
                let units = f64::from(component.quantity) * f64::from(input.quantity);
                let expected = (units * rate).floor() as u32;
                let mut tags = vec![SALVAGED_TAG.to_string()];
                for tag in &component.required_tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                let capped = component
                    .quality_ceiling
                    .map_or(quality, |ceiling| quality.min(ceiling));
                recoveries.push(ComponentRecovery {
                    item_id: component.item_id.clone(),
                    expected_quantity: expected,
                    quality: capped.clamp(0.0, 100.0),
                    confidence: (rate * (1.0 - self.disassembly_failure)).clamp(0.0, 1.0),
                    tags,
                    quality_ceiling: component.quality_ceiling,
                });
            }
        } else {
            let confidence = treatments
                .iter()
                .map(|t| t.success_probability)
                .product::<f64>();
            recoveries.push(ComponentRecovery {
                item_id: input.item_id.clone(),
                expected_quantity: input.quantity,
                quality: input.quality,
                confidence,
                tags: remaining_tags,
                quality_ceiling: None,
            });
        }

        let risks = self.risks(base.tier, input, &conditions, &treatments);

        Ok(ConditionAnalysis {
            item_id: input.item_id.clone(),
            quantity: input.quantity,
            quality: input.quality,
            tier: base.tier,
            conditions,
            treatments,
            recoveries,
            risks,
        })
    }

    fn risks(
        &self,
        tier: Tier,
        input: &ItemInstance,
        conditions: &[Condition],
        treatments: &[TreatmentStep],
    ) -> Vec<RiskFactor> {
        let mut risks = Vec::new();
        for condition in conditions {
            let probability = treatments
                .iter()
                .find(|t| t.condition == *condition)
                .map_or(0.1, |t| 1.0 - t.success_probability);
            let (severity, impact, description) = match condition {
                Condition::Cracked => (
                    RiskSeverity::High,
                    RiskImpact::Safety,
                    "structural crack may propagate",
                ),
                Condition::Corroded => (
                    RiskSeverity::Medium,
                    RiskImpact::Quality,
                    "corrosion may recur under load",
                ),
                Condition::Contaminated => (
                    RiskSeverity::Low,
                    RiskImpact::Quality,
                    "residue may remain after cleaning",
                ),
                Condition::Worn => (
                    RiskSeverity::Low,
                    RiskImpact::Quality,
                    "wear lowers salvage quality",
                ),
            };
            risks.push(RiskFactor {
                description: format!("{}: {}", input.item_id, description),
                probability,
                severity,
                impact,
            });
        }
        if input.quality < LOW_QUALITY_THRESHOLD {
            risks.push(RiskFactor {
                description: format!(
                    "{}: quality {:.0} limits usable yield",
                    input.item_id, input.quality
                ),
                probability: 0.5,
                severity: RiskSeverity::High,
                impact: RiskImpact::Yield,
            });
        }
        if tier == Tier::Assembly && self.disassembly_failure > 0.0 {
            risks.push(RiskFactor {
                description: format!("{}: teardown may damage components", input.item_id),
                probability: self.disassembly_failure,
                severity: RiskSeverity::Low,
                impact: RiskImpact::Schedule,
            });
        }
        risks
    }
}

/// Fraction of a recipe expected back from a damaged assembly.
pub fn recovery_rate(quality: f64, conditions: &[Condition]) -> f64 {
    let base = (quality / 100.0).max(MIN_RECOVERY_RATE);
    conditions
        .iter()
        .map(|c| match c {
            Condition::Cracked => 0.75,
            Condition::Corroded => 0.9,
            Condition::Contaminated => 0.95,
            Condition::Worn => 0.9,
        })
        .fold(base, |rate, factor| rate * factor)
        .min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_treatment_order_respects_prerequisites() {
        let order = ConditionAnalyzer::treatment_order(&[
            Condition::Cracked,
            Condition::Corroded,
            Condition::Contaminated,
            Condition::Worn,
        ]);
        assert_eq!(
            order,
            vec![Condition::Contaminated, Condition::Corroded, Condition::Cracked]
        );
    }

    #[test]
    fn test_treatment_order_without_prerequisite_present() {
        // Cracked requires corroded only when corroded is present.
        let order =
            ConditionAnalyzer::treatment_order(&[Condition::Cracked, Condition::Contaminated]);
        assert_eq!(order, vec![Condition::Contaminated, Condition::Cracked]);
    }

    #[test]
    fn test_recovery_rate() {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-10;
        assert!(close(recovery_rate(100.0, &[]), 1.0));
        assert!(close(recovery_rate(10.0, &[]), 0.25));
        assert!(close(recovery_rate(80.0, &[Condition::Cracked]), 0.6));
    }

    #[test]
    fn test_analyze_assembly_input() {
        let analyzer = ConditionAnalyzer::new(0.85);
        let input = ItemInstance::new("gearbox", 1)
            .with_quality(80.0)
            .with_condition(Condition::Corroded);
        let analysis = analyzer.analyze(&fixtures::catalog(), &input).unwrap();

        assert_eq!(analysis.tier, Tier::Assembly);
        assert!(analysis.is_disassembled());
        assert_eq!(analysis.treatments.len(), 1);
        assert_eq!(analysis.treatments[0].condition, Condition::Corroded);
        let category = &analysis.treatments[0].requirement.category;
        assert_eq!(category, "surface_treatment");

        // rate = 0.8 × 0.9 = 0.72; gear: floor(2 × 0.72) = 1, shaft: floor(0.72) = 0
        let recovered = |id: &str| analysis.recoveries.iter().find(|r| r.item_id == id);
        let gear = recovered("gear").unwrap();
        assert_eq!(gear.expected_quantity, 1);
        assert!((gear.quality - 68.0).abs() < 1e-9);
        assert!(gear.tags.contains(&SALVAGED_TAG.to_string()));
        let shaft = recovered("shaft").unwrap();
        assert_eq!(shaft.expected_quantity, 0);
    }

    #[test]
    fn test_analyze_shaped_input_recovers_itself() {
        let analyzer = ConditionAnalyzer::new(0.85);
        let input = ItemInstance::new("gear", 3)
            .with_quality(70.0)
            .with_condition(Condition::Contaminated)
            .with_condition(Condition::Worn);
        let analysis = analyzer.analyze(&fixtures::catalog(), &input).unwrap();

        assert_eq!(analysis.recoveries.len(), 1);
        let own = &analysis.recoveries[0];
        assert_eq!(own.item_id, "gear");
        assert_eq!(own.expected_quantity, 3);
        assert_eq!(own.tags, vec!["worn".to_string()]);
        assert!((own.confidence - 0.9).abs() < 1e-10);
        assert_eq!(analysis.treatments[0].duration_ms, 900_000);
    }

    #[test]
    fn test_risks() {
        let analyzer = ConditionAnalyzer::new(0.85);
        let input = ItemInstance::new("gear", 1)
            .with_quality(20.0)
            .with_condition(Condition::Cracked);
        let analysis = analyzer.analyze(&fixtures::catalog(), &input).unwrap();
        // cracked + low quality
        assert_eq!(analysis.high_risk_count(), 2);
        let crack = analysis
            .risks
            .iter()
            .find(|r| r.impact == RiskImpact::Safety)
            .unwrap();
        assert!((crack.probability - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_unknown_input() {
        let analyzer = ConditionAnalyzer::new(0.85);
        let input = ItemInstance::new("flux_capacitor", 1);
        let err = analyzer.analyze(&fixtures::catalog(), &input).unwrap_err();
        let expected = crate::error::FabricationError::UnknownItem("flux_capacitor".into());
        assert_eq!(err, expected);
    }
}
