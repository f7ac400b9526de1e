//! Workflow synthesis.
//!
//! Turns a gap report and input analyses into one ordered plan:
//!
//! 1. treatments per input, in prerequisite-respecting precedence order
//! 2. disassembly per assembly-tier input, producing salvaged components
//! 3. one shaping or assembly operation per manufacture gap, children first
//! 4. the final operation producing the target
//!
//! Every operation therefore appears after the operations it depends on.
//! Generated plans are validated before they are returned.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{
    analyze_gaps, component_quantity, ConditionAnalysis, ConditionAnalyzer, GapReport,
};
use crate::config::PlanningConfig;
use crate::error::{FabricationError, Result};
use crate::models::{
    BaseItem, FailurePolicy, Inventory, ItemCatalog, ItemInstance, LaborClass, ManufacturingPlan,
    MaterialSpec, Operation, OperationKind, Tier,
};
use crate::validation::{describe, validate_plan};

/// What to build and from which damaged inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Target item id.
    pub target_id: String,
    /// Target units.
    pub quantity: u32,
    /// Caller-supplied input items (moved into the job at creation).
    pub inputs: Vec<ItemInstance>,
}

impl PlanRequest {
    /// Creates a request without inputs.
    pub fn new(target_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            target_id: target_id.into(),
            quantity,
            inputs: Vec::new(),
        }
    }

    /// Adds an input item.
    pub fn with_input(mut self, input: ItemInstance) -> Self {
        self.inputs.push(input);
        self
    }
}

/// A plan plus the analysis that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPlan {
    /// The plan.
    pub plan: ManufacturingPlan,
    /// Gap walk.
    pub gaps: GapReport,
    /// One analysis per input, in request order.
    pub analyses: Vec<ConditionAnalysis>,
}

/// Synthesizes manufacturing plans.
#[derive(Debug, Clone)]
pub struct WorkflowGenerator<'a> {
    items: &'a ItemCatalog,
    config: &'a PlanningConfig,
    analyzer: ConditionAnalyzer,
}

impl<'a> WorkflowGenerator<'a> {
    /// Creates a generator using the default treatment profiles.
    pub fn new(items: &'a ItemCatalog, config: &'a PlanningConfig) -> Self {
        Self {
            items,
            config,
            analyzer: ConditionAnalyzer::from_config(config),
        }
    }

    /// Replaces the condition analyzer.
    pub fn with_analyzer(mut self, analyzer: ConditionAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Generates a plan against a facility stock snapshot.
    ///
    /// # Errors
    /// Any definition error (unknown id, unmanufacturable node, recipe
    /// cycle, zero quantity, invalid plan). No partial plan is returned.
    pub fn generate(&self, request: &PlanRequest, stock: &Inventory) -> Result<GeneratedPlan> {
        for input in &request.inputs {
            if input.quantity == 0 {
                return Err(FabricationError::InvalidQuantity {
                    item_id: input.item_id.clone(),
                    quantity: 0,
                });
            }
        }

        let analyses = request
            .inputs
            .iter()
            .map(|input| self.analyzer.analyze(self.items, input))
            .collect::<Result<Vec<_>>>()?;
        let recoveries: Vec<_> = analyses
            .iter()
            .flat_map(|a| a.recoveries.iter().cloned())
            .collect();

        let gaps = analyze_gaps(
            self.items,
            &request.target_id,
            request.quantity,
            stock,
            &recoveries,
        )?;
        let target = self.items.get(&request.target_id)?;

        let mut plan = ManufacturingPlan::new(&request.target_id, request.quantity);
        let mut ids = OperationIds::default();

        for (input, analysis) in request.inputs.iter().zip(&analyses) {
            self.emit_input_steps(&mut plan, &mut ids, input, analysis)?;
        }

        for index in gaps.manufacture_order() {
            let gap = &gaps.gaps[index];
            let item = self.items.get(&gap.item_id)?;
            let op = self
                .build_operation(ids.next(), item, gap.need_to_manufacture)?
                .producing(
                    MaterialSpec::new(&gap.item_id, gap.need_to_manufacture)
                        .with_tags(gap.required_tags.clone())
                        .with_quality_ceiling(gap.quality_ceiling),
                )
                .with_note(format!("gap: {} x{}", gap.item_id, gap.need_to_manufacture));
            plan.push(op);
        }

        let final_op = self
            .build_operation(ids.next(), target, request.quantity)?
            .producing(MaterialSpec::new(&target.id, request.quantity))
            .with_note(format!("final: {} x{}", target.id, request.quantity));
        plan.push(final_op);

        plan.raw_requirements = gaps.raw_requirements()?;
        plan.confidence = self.confidence(&gaps, &analyses);

        validate_plan(&plan, self.items)
            .map_err(|errors| FabricationError::InvalidPlan(describe(&errors)))?;

        debug!(
            target = %plan.target_id,
            quantity = plan.target_quantity,
            operations = plan.operation_count(),
            confidence = plan.confidence,
            "plan generated"
        );

        Ok(GeneratedPlan {
            plan,
            gaps,
            analyses,
        })
    }

    fn emit_input_steps(
        &self,
        plan: &mut ManufacturingPlan,
        ids: &mut OperationIds,
        input: &ItemInstance,
        analysis: &ConditionAnalysis,
    ) -> Result<()> {
        let mut tags: Vec<String> = input.tags.iter().cloned().collect();

        for step in &analysis.treatments {
            let consumed = MaterialSpec::new(&input.item_id, input.quantity)
                .with_tags(tags.clone());
            tags.retain(|t| t != step.condition.tag());
            let produced = MaterialSpec::new(&input.item_id, input.quantity)
                .with_tags(tags.clone());
            plan.push(
                Operation::new(
                    ids.next(),
                    OperationKind::Treatment {
                        condition: step.condition,
                    },
                    step.requirement.clone(),
                )
                .with_duration(step.duration_ms)
                .consuming(consumed)
                .producing(produced)
                .with_failure(1.0 - step.success_probability, FailurePolicy::Rework)
                .with_labor(step.labor)
                .with_note(format!(
                    "treat {} on input {}",
                    step.condition, input.item_id
                ))
                .conditional(),
            );
        }

        if analysis.is_disassembled() {
            let base = self.items.get(&input.item_id)?;
            let duration_ms =
                (base.build_time_ms / 2).saturating_mul(i64::from(input.quantity));
            let consumed = MaterialSpec::new(&input.item_id, input.quantity)
                .with_tags(tags);
            let mut op = Operation::new(
                ids.next(),
                OperationKind::Disassembly,
                self.config.disassembly_capability.clone(),
            )
            .with_duration(duration_ms)
            .consuming(consumed)
            .with_failure(self.config.failure.disassembly, FailurePolicy::Downgrade)
            .with_labor(LaborClass::Technician)
            .with_note(format!("disassemble input {}", input.item_id));
            let recovered = analysis
                .recoveries
                .iter()
                .filter(|r| r.expected_quantity > 0);
            for recovery in recovered {
                op = op.producing(
                    MaterialSpec::new(&recovery.item_id, recovery.expected_quantity)
                        .with_tags(recovery.tags.clone())
                        .with_quality(recovery.quality)
                        .with_quality_ceiling(recovery.quality_ceiling),
                );
            }
            plan.push(op);
        }
        Ok(())
    }

    /// Shaping or assembly of `quantity` units of `item`, consuming its recipe.
    fn build_operation(&self, id: String, item: &BaseItem, quantity: u32) -> Result<Operation> {
        let (kind, policy, labor) = match item.tier {
            Tier::ShapedMaterial => (
                OperationKind::Shaping,
                FailurePolicy::Scrap,
                LaborClass::Automated,
            ),
            Tier::Assembly => (
                OperationKind::Assembly,
                FailurePolicy::Rework,
                LaborClass::Technician,
            ),
            Tier::RawMaterial => return Err(FabricationError::NotManufacturable(item.id.clone())),
        };
        let requirement = item
            .capability
            .clone()
            .or_else(|| self.config.capability_for(&kind).cloned())
            .ok_or_else(|| FabricationError::NotManufacturable(item.id.clone()))?;

        let mut op = Operation::new(id, kind, requirement)
            .with_duration(item.build_time_ms.saturating_mul(i64::from(quantity)))
            .with_failure(self.config.failure_probability(&kind), policy)
            .with_labor(labor);
        for component in &item.recipe {
            op = op.consuming(
                MaterialSpec::new(&component.item_id, component_quantity(component, quantity)?)
                    .with_tags(component.required_tags.clone())
                    .with_quality_ceiling(component.quality_ceiling),
            );
        }
        Ok(op)
    }

    /// Heuristic success estimate.
    ///
    /// `clamp(ceiling × (1 − d_risk × high_risks) − d_make × fresh, floor, ceiling)`
    fn confidence(&self, gaps: &GapReport, analyses: &[ConditionAnalysis]) -> f64 {
        let cfg = self.config;
        let high_risks: usize = analyses
            .iter()
            .map(ConditionAnalysis::high_risk_count)
            .sum();
        let risk_factor = (1.0 - cfg.high_risk_discount * high_risks as f64).max(0.0);
        let fresh_penalty = cfg.manufacture_discount * gaps.fresh_fraction();
        let raw = cfg.confidence_ceiling * risk_factor - fresh_penalty;
        raw.clamp(cfg.confidence_floor, cfg.confidence_ceiling)
    }
}

#[derive(Debug, Default)]
struct OperationIds(u32);

impl OperationIds {
    fn next(&mut self) -> String {
        self.0 += 1;
        format!("OP-{:03}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::models::Condition;

    fn generate(request: &PlanRequest, stock: &Inventory) -> Result<GeneratedPlan> {
        let items = fixtures::catalog();
        let config = PlanningConfig::default();
        WorkflowGenerator::new(&items, &config).generate(request, stock)
    }

    fn assert_producers_first(plan: &ManufacturingPlan) {
        for (c, consumer) in plan.operations.iter().enumerate() {
            for need in &consumer.consumes {
                let producers: Vec<usize> = plan
                    .operations
                    .iter()
                    .enumerate()
                    .filter(|(p, op)| {
                        *p != c && op.produces.iter().any(|out| out.feeds(need))
                    })
                    .map(|(p, _)| p)
                    .collect();
                if !producers.is_empty() {
                    assert!(
                        producers.iter().any(|&p| p < c),
                        "{} consumes {} before it is produced",
                        consumer.id,
                        need.item_id
                    );
                }
            }
        }
    }

    #[test]
    fn test_components_in_stock_gives_single_assembly() {
        let stock = fixtures::stock_for_drive_unit();
        let generated = generate(&PlanRequest::new("drive_unit", 1), &stock).unwrap();
        let plan = &generated.plan;

        assert_eq!(plan.operation_count(), 1);
        assert_eq!(plan.operations[0].kind, OperationKind::Assembly);
        assert!(plan.operations[0].produces_item("drive_unit"));
        assert!(plan.confidence >= 0.8);
        assert!(plan.raw_requirements.is_empty());
    }

    #[test]
    fn test_empty_stock_two_level_recipe() {
        let generated = generate(&PlanRequest::new("drive_unit", 1), &Inventory::new()).unwrap();
        let plan = &generated.plan;

        // 6 missing leaves + 2 missing intermediates + final
        assert_eq!(plan.operation_count(), 9);
        let shaping = plan
            .operations
            .iter()
            .filter(|op| op.kind == OperationKind::Shaping)
            .count();
        assert_eq!(shaping, 6);
        assert!(plan.operations[8].produces_item("drive_unit"));
        assert_producers_first(plan);

        // 6 × 60s shaping + 2 × 120s assembly + 180s final
        assert_eq!(plan.total_duration_ms, 780_000);
        assert_eq!(plan.raw_requirements.get("polymer_resin"), Some(&4));
        // 0.95 - 0.30 × 1.0
        assert!((plan.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_operation_ids_and_policies() {
        let plan = generate(&PlanRequest::new("gearbox", 2), &Inventory::new())
            .unwrap()
            .plan;
        let ids: Vec<&str> = plan.operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["OP-001", "OP-002", "OP-003", "OP-004"]);

        let gear_op = &plan.operations[0];
        assert_eq!(gear_op.failure_policy, FailurePolicy::Scrap);
        assert_eq!(gear_op.consumes[0].quantity, 8);
        assert_eq!(gear_op.duration_ms, 240_000);
        assert_eq!(gear_op.requirement.category, "machining");
        assert_eq!(plan.operations[3].failure_policy, FailurePolicy::Rework);
    }

    #[test]
    fn test_damaged_assembly_input() {
        let input = ItemInstance::new("gearbox", 1)
            .with_quality(80.0)
            .with_condition(Condition::Corroded);
        let request = PlanRequest::new("drive_unit", 1).with_input(input);
        let generated = generate(&request, &fixtures::raw_stock_for_drive_unit()).unwrap();
        let plan = &generated.plan;

        assert_eq!(plan.operation_count(), 11);
        let treat = &plan.operations[0];
        assert_eq!(
            treat.kind,
            OperationKind::Treatment {
                condition: Condition::Corroded
            }
        );
        assert!(treat.conditional);
        assert_eq!(treat.consumes[0].tags, vec!["corroded".to_string()]);
        assert!(treat.produces[0].tags.is_empty());
        assert!((treat.failure_probability - 0.15).abs() < 1e-9);

        let teardown = &plan.operations[1];
        assert_eq!(teardown.kind, OperationKind::Disassembly);
        assert_eq!(teardown.failure_policy, FailurePolicy::Downgrade);
        assert_eq!(teardown.duration_ms, 60_000);
        assert_eq!(teardown.produces.len(), 1);
        assert_eq!(teardown.produces[0].item_id, "gear");
        assert!(teardown.produces[0].tags.contains(&"salvaged".to_string()));

        // The recovered gear halves the gear gap.
        let gear_op = plan
            .operations
            .iter()
            .find(|op| {
                op.kind == OperationKind::Shaping && op.produces_item("gear")
            })
            .unwrap();
        assert_eq!(gear_op.produces[0].quantity, 1);
        assert_producers_first(plan);
    }

    #[test]
    fn test_high_risk_discounts_confidence() {
        let input = ItemInstance::new("gear", 2)
            .with_quality(20.0)
            .with_condition(Condition::Cracked);
        let request = PlanRequest::new("gearbox", 1).with_input(input);
        let stock = Inventory::new()
            .with_item(ItemInstance::new("shaft", 1))
            .with_item(ItemInstance::new("housing", 1));
        let plan = generate(&request, &stock).unwrap().plan;

        // treat(cracked) + final; both gears come back from the input
        assert_eq!(plan.operation_count(), 2);
        // 0.95 × (1 − 0.1 × 2) − 0
        assert!((plan.confidence - 0.76).abs() < 1e-9);
    }

    #[test]
    fn test_definition_errors_return_no_plan() {
        assert_eq!(
            generate(&PlanRequest::new("warp_core", 1), &Inventory::new()).unwrap_err(),
            FabricationError::UnknownItem("warp_core".into())
        );
        let request = PlanRequest::new("gearbox", 1).with_input(ItemInstance::new("mystery", 1));
        assert_eq!(
            generate(&request, &Inventory::new()).unwrap_err(),
            FabricationError::UnknownItem("mystery".into())
        );
        let request = PlanRequest::new("gearbox", 1).with_input(ItemInstance::new("gear", 0));
        assert!(matches!(
            generate(&request, &Inventory::new()),
            Err(FabricationError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_oversized_quantity_is_an_error() {
        let stock = Inventory::new();
        assert_eq!(
            generate(&PlanRequest::new("gear", 3_000_000_000), &stock).unwrap_err(),
            FabricationError::InvalidQuantity {
                item_id: "steel_bar".into(),
                quantity: 3_000_000_000,
            }
        );
        assert!(matches!(
            generate(&PlanRequest::new("gearbox", u32::MAX / 2), &stock),
            Err(FabricationError::InvalidQuantity { .. })
        ));

        // 2 × (u32::MAX / 2) still fits
        let plan = generate(&PlanRequest::new("gear", u32::MAX / 2), &stock)
            .unwrap()
            .plan;
        let steel = plan.raw_requirements.get("steel_bar");
        assert_eq!(steel, Some(&(u32::MAX - 1)));
    }

    #[test]
    fn test_shaped_target_uses_shaping() {
        let plan = generate(&PlanRequest::new("gear", 3), &Inventory::new())
            .unwrap()
            .plan;
        assert_eq!(plan.operation_count(), 1);
        assert_eq!(plan.operations[0].kind, OperationKind::Shaping);
        assert_eq!(plan.raw_requirements.get("steel_bar"), Some(&6));
    }
}
