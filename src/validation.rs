//! Structural validation for manufacturing plans.
//!
//! Checks a plan against the item catalog before it is executed. Detects:
//! - Duplicate operation IDs
//! - References to unknown items
//! - Zero quantities
//! - Empty plans
//! - Consumers placed before their only producers
//! - Circular producer/consumer links (DAG validation)
//!
//! # Reference
//! Cormen et al. (2009), "Introduction to Algorithms", Ch. 22.4 (Topological Sort)

use crate::models::{ItemCatalog, ManufacturingPlan};
use std::collections::{HashMap, HashSet};

/// Validation result.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// A validation error.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Error category.
    pub kind: ValidationErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Two operations share the same ID.
    DuplicateId,
    /// A material spec names an item missing from the catalog.
    UnknownItem,
    /// A material spec has a zero quantity.
    InvalidQuantity,
    /// The plan has no operations.
    EmptyPlan,
    /// An operation consumes an item only produced later in the plan.
    ProducerAfterConsumer,
    /// Producer/consumer graph contains a cycle.
    CyclicDependency,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Renders errors into a single line.
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validates a manufacturing plan.
///
/// Checks:
/// 1. The plan has at least one operation
/// 2. No duplicate operation IDs
/// 3. Every consumed and produced item exists in the catalog
/// 4. Every material quantity is positive
/// 5. No operation consumes an item whose producers all come after it
/// 6. No circular producer/consumer links
///
/// # Returns
/// `Ok(())` if all checks pass, `Err(errors)` with all detected issues.
pub fn validate_plan(plan: &ManufacturingPlan, items: &ItemCatalog) -> ValidationResult {
    let mut errors = Vec::new();

    if plan.operations.is_empty() {
        errors.push(ValidationError::new(
            ValidationErrorKind::EmptyPlan,
            format!("Plan for '{}' has no operations", plan.target_id),
        ));
    }

    let mut op_ids = HashSet::new();
    for op in &plan.operations {
        if !op_ids.insert(op.id.as_str()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateId,
                format!("Duplicate operation ID: {}", op.id),
            ));
        }

        for spec in op.consumes.iter().chain(op.produces.iter()) {
            if !items.contains(&spec.item_id) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownItem,
                    format!(
                        "Operation '{}' references unknown item '{}'",
                        op.id, spec.item_id
                    ),
                ));
            }
            if spec.quantity == 0 {
                errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidQuantity,
                    format!(
                        "Operation '{}' moves zero units of '{}'",
                        op.id, spec.item_id
                    ),
                ));
            }
        }
    }

    // Check producer ordering
    for (c, consumer) in plan.operations.iter().enumerate() {
        for need in &consumer.consumes {
            let mut before = false;
            let mut after = false;
            for (p, producer) in plan.operations.iter().enumerate() {
                if p == c || !producer.produces.iter().any(|out| out.feeds(need)) {
                    continue;
                }
                if p < c {
                    before = true;
                } else {
                    after = true;
                }
            }
            if after && !before {
                errors.push(ValidationError::new(
                    ValidationErrorKind::ProducerAfterConsumer,
                    format!(
                        "Operation '{}' consumes '{}' before any operation produces it",
                        consumer.id, need.item_id
                    ),
                ));
            }
        }
    }

    // Check for cycles in the producer/consumer graph (DFS-based)
    if let Some(cycle_err) = detect_cycles(plan) {
        errors.push(cycle_err);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Detects cycles in the producer/consumer graph using DFS.
///
/// # Algorithm
/// Topological sort via DFS. If a back-edge is found (visiting a node
/// currently in the recursion stack), a cycle exists.
///
/// # Reference
/// Cormen et al. (2009), "Introduction to Algorithms", Ch. 22.4
fn detect_cycles(plan: &ManufacturingPlan) -> Option<ValidationError> {
    // Build adjacency list: producer index → consumer indices
    let mut adj: HashMap<usize, Vec<usize>> = HashMap::new();
    for (consumer, producers) in plan.dependencies().into_iter().enumerate() {
        for producer in producers {
            adj.entry(producer).or_default().push(consumer);
        }
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    for node in 0..plan.operations.len() {
        if !visited.contains(&node) && has_cycle_dfs(node, &adj, &mut visited, &mut in_stack) {
            return Some(ValidationError::new(
                ValidationErrorKind::CyclicDependency,
                format!(
                    "Circular dependency detected involving operation '{}'",
                    plan.operations[node].id
                ),
            ));
        }
    }

    None
}

fn has_cycle_dfs(
    node: usize,
    adj: &HashMap<usize, Vec<usize>>,
    visited: &mut HashSet<usize>,
    in_stack: &mut HashSet<usize>,
) -> bool {
    visited.insert(node);
    in_stack.insert(node);

    if let Some(neighbors) = adj.get(&node) {
        for &next in neighbors {
            if in_stack.contains(&next) {
                return true; // Back edge → cycle
            }
            if !visited.contains(&next) && has_cycle_dfs(next, adj, visited, in_stack) {
                return true;
            }
        }
    }

    in_stack.remove(&node);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaseItem, CapabilityRequirement, MaterialSpec, Operation, OperationKind};

    fn catalog() -> ItemCatalog {
        ItemCatalog::new()
            .with_item(BaseItem::raw("steel_bar"))
            .with_item(BaseItem::shaped("gear").with_input("steel_bar", 2))
            .with_item(BaseItem::shaped("shaft").with_input("steel_bar", 1))
            .with_item(
                BaseItem::assembly("gearbox")
                    .with_input("gear", 2)
                    .with_input("shaft", 1),
            )
    }

    fn op(id: &str, consumes: &[(&str, u32)], produces: &[(&str, u32)]) -> Operation {
        let requirement = CapabilityRequirement::new("machining", 1.0);
        let mut op = Operation::new(id, OperationKind::Shaping, requirement);
        for (item, q) in consumes {
            op = op.consuming(MaterialSpec::new(*item, *q));
        }
        for (item, q) in produces {
            op = op.producing(MaterialSpec::new(*item, *q));
        }
        op
    }

    fn valid_plan() -> ManufacturingPlan {
        ManufacturingPlan::new("gearbox", 1)
            .with_operation(op("OP-1", &[("steel_bar", 4)], &[("gear", 2)]))
            .with_operation(op("OP-2", &[("steel_bar", 1)], &[("shaft", 1)]))
            .with_operation(op("OP-3", &[("gear", 2), ("shaft", 1)], &[("gearbox", 1)]))
    }

    fn kinds(plan: &ManufacturingPlan) -> Vec<ValidationErrorKind> {
        validate_plan(plan, &catalog())
            .unwrap_err()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[test]
    fn test_valid_plan() {
        assert!(validate_plan(&valid_plan(), &catalog()).is_ok());
    }

    #[test]
    fn test_empty_plan() {
        let plan = ManufacturingPlan::new("gearbox", 1);
        assert!(kinds(&plan).contains(&ValidationErrorKind::EmptyPlan));
    }

    #[test]
    fn test_duplicate_id() {
        let plan = valid_plan().with_operation(op("OP-1", &[("steel_bar", 1)], &[("shaft", 1)]));
        assert!(kinds(&plan).contains(&ValidationErrorKind::DuplicateId));
    }

    #[test]
    fn test_unknown_item_and_zero_quantity() {
        let plan = ManufacturingPlan::new("gearbox", 1)
            .with_operation(op(
                "OP-1",
                &[("unobtainium", 1), ("steel_bar", 0)],
                &[("gear", 1)],
            ));
        let found = kinds(&plan);
        assert!(found.contains(&ValidationErrorKind::UnknownItem));
        assert!(found.contains(&ValidationErrorKind::InvalidQuantity));
    }

    #[test]
    fn test_producer_after_consumer() {
        let plan = ManufacturingPlan::new("gearbox", 1)
            .with_operation(op("OP-1", &[("gear", 2), ("shaft", 1)], &[("gearbox", 1)]))
            .with_operation(op("OP-2", &[("steel_bar", 4)], &[("gear", 2)]));
        let found = kinds(&plan);
        assert!(found.contains(&ValidationErrorKind::ProducerAfterConsumer));
    }

    #[test]
    fn test_repeated_producer_is_allowed() {
        // A second shaft producer after the first consumer feeds a later one.
        let plan = valid_plan()
            .with_operation(op("OP-4", &[("steel_bar", 1)], &[("shaft", 1)]))
            .with_operation(op("OP-5", &[("shaft", 1)], &[("gear", 1)]));
        assert!(validate_plan(&plan, &catalog()).is_ok());
    }

    #[test]
    fn test_cyclic_dependency() {
        // OP-1 needs shaft from OP-2, OP-2 needs gear from OP-1
        let plan = ManufacturingPlan::new("gearbox", 1)
            .with_operation(op("OP-1", &[("shaft", 1)], &[("gear", 1)]))
            .with_operation(op("OP-2", &[("gear", 1)], &[("shaft", 1)]));
        let found = kinds(&plan);
        assert!(found.contains(&ValidationErrorKind::CyclicDependency));
    }

    #[test]
    fn test_describe_joins_messages() {
        let plan = ManufacturingPlan::new("gearbox", 1)
            .with_operation(op("OP-1", &[("unobtainium", 0)], &[("gear", 1)]));
        let errors = validate_plan(&plan, &catalog()).unwrap_err();
        assert!(errors.len() >= 2);
        let text = describe(&errors);
        assert!(text.contains("unobtainium"));
        assert!(text.contains("; "));
    }
}
