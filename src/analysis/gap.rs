//! Recursive gap analysis over a recipe hierarchy.
//!
//! Walks the target's recipe depth-first. At each node the required
//! quantity is covered first from matching facility stock, then from
//! predicted recovery; the rest must be manufactured, which recurses into
//! that node's own recipe. Stock and recovery are budgets: a unit claimed
//! by one node is not seen by later nodes.
//!
//! Raw materials are never manufactured. A raw shortfall is recorded as
//! `unmet` and left for the job to wait on.
//!
//! [`analyze_gaps`] is pure: it clones the stock snapshot and returns an
//! immutable report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ComponentRecovery;
use crate::error::{FabricationError, Result};
use crate::models::{Inventory, ItemCatalog, ItemInstance, Pool, RecipeComponent, Tier};

/// Shortfall record for one recipe node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Position in the report (pre-order).
    pub index: usize,
    /// Component item id.
    pub item_id: String,
    /// Component tier.
    pub tier: Tier,
    /// Depth below the target (target's components are 0).
    pub depth: usize,
    /// Parent gap, `None` for the target's components.
    pub parent: Option<usize>,
    /// Child gaps (components of the manufactured quantity).
    pub children: Vec<usize>,
    /// Units needed.
    pub required: u32,
    /// Units covered by facility stock.
    pub available: u32,
    /// Units covered by predicted recovery.
    pub recoverable: u32,
    /// Units an operation must make.
    pub need_to_manufacture: u32,
    /// Raw units nobody can supply yet.
    pub unmet: u32,
    /// Tags the consumer requires.
    pub required_tags: Vec<String>,
    /// Quality ceiling the consumer accepts.
    pub quality_ceiling: Option<f64>,
}

impl Gap {
    /// Units not covered by stock or recovery.
    pub fn shortfall(&self) -> u32 {
        self.need_to_manufacture + self.unmet
    }
}

/// Result of a gap walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    /// Target item id.
    pub target_id: String,
    /// Target units.
    pub target_quantity: u32,
    /// Gaps in pre-order.
    pub gaps: Vec<Gap>,
}

impl GapReport {
    /// Gaps for the target's direct components.
    pub fn roots(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(|g| g.parent.is_none())
    }

    /// Indices of gaps needing manufacture, children before parents.
    pub fn manufacture_order(&self) -> Vec<usize> {
        let mut order = Vec::new();
        for root in self.roots() {
            self.post_order(root.index, &mut order);
        }
        order
    }

    fn post_order(&self, index: usize, out: &mut Vec<usize>) {
        let gap = &self.gaps[index];
        for &child in &gap.children {
            self.post_order(child, out);
        }
        if gap.need_to_manufacture > 0 {
            out.push(index);
        }
    }

    /// Raw units drawn from stock or still missing, per item id.
    ///
    /// # Errors
    /// [`FabricationError::InvalidQuantity`] when an item's total does not
    /// fit in `u32`.
    pub fn raw_requirements(&self) -> Result<BTreeMap<String, u32>> {
        let mut totals: BTreeMap<String, u32> = BTreeMap::new();
        for gap in self.gaps.iter().filter(|g| g.tier.is_raw()) {
            let qty = gap.available + gap.unmet;
            if qty == 0 {
                continue;
            }
            let total = totals.entry(gap.item_id.clone()).or_insert(0);
            *total = total
                .checked_add(qty)
                .ok_or_else(|| FabricationError::InvalidQuantity {
                    item_id: gap.item_id.clone(),
                    quantity: self.target_quantity,
                })?;
        }
        Ok(totals)
    }

    /// Raw units nobody can supply yet, per item id.
    pub fn unmet(&self) -> BTreeMap<String, u32> {
        let mut totals: BTreeMap<String, u32> = BTreeMap::new();
        for gap in self.gaps.iter().filter(|g| g.unmet > 0) {
            let total = totals.entry(gap.item_id.clone()).or_insert(0);
            *total = total.saturating_add(gap.unmet);
        }
        totals
    }

    /// Fraction of the target's direct components that must be made fresh.
    pub fn fresh_fraction(&self) -> f64 {
        let (made, required) = self
            .roots()
            .fold((0u64, 0u64), |(m, r), g| {
                (m + u64::from(g.need_to_manufacture), r + u64::from(g.required))
            });
        if required == 0 {
            0.0
        } else {
            made as f64 / required as f64
        }
    }

    /// Whether every direct component is covered without manufacturing.
    pub fn is_fully_covered(&self) -> bool {
        self.roots().all(|g| g.shortfall() == 0)
    }
}

/// Units of `component` consumed by `units` of its parent.
///
/// # Errors
/// [`FabricationError::InvalidQuantity`] when the product overflows `u32`.
pub(crate) fn component_quantity(component: &RecipeComponent, units: u32) -> Result<u32> {
    component
        .quantity
        .checked_mul(units)
        .ok_or_else(|| FabricationError::InvalidQuantity {
            item_id: component.item_id.clone(),
            quantity: units,
        })
}

/// Computes the shortfalls for making `quantity` units of `target_id`.
///
/// # Errors
/// - [`FabricationError::InvalidQuantity`] for a zero quantity, or one
///   whose component quantities overflow `u32`
/// - [`FabricationError::UnknownItem`] for any uncataloged id
/// - [`FabricationError::NotManufacturable`] for a raw target, or a
///   non-raw node without a recipe that needs manufacturing
/// - [`FabricationError::RecipeCycle`] when a recipe contains itself
pub fn analyze_gaps(
    catalog: &ItemCatalog,
    target_id: &str,
    quantity: u32,
    stock: &Inventory,
    recoveries: &[ComponentRecovery],
) -> Result<GapReport> {
    if quantity == 0 {
        return Err(FabricationError::InvalidQuantity {
            item_id: target_id.to_string(),
            quantity,
        });
    }
    let target = catalog.get(target_id)?;
    if !target.is_manufacturable() {
        return Err(FabricationError::NotManufacturable(target_id.to_string()));
    }

    let mut walker = GapWalker {
        catalog,
        stock: stock.clone(),
        recoveries: recoveries.to_vec(),
        gaps: Vec::new(),
        path: vec![target_id.to_string()],
    };
    for component in &target.recipe {
        walker.visit(component, quantity, 0, None)?;
    }

    Ok(GapReport {
        target_id: target_id.to_string(),
        target_quantity: quantity,
        gaps: walker.gaps,
    })
}

struct GapWalker<'a> {
    catalog: &'a ItemCatalog,
    stock: Inventory,
    recoveries: Vec<ComponentRecovery>,
    gaps: Vec<Gap>,
    path: Vec<String>,
}

impl GapWalker<'_> {
    fn visit(
        &mut self,
        component: &RecipeComponent,
        parent_quantity: u32,
        depth: usize,
        parent: Option<usize>,
    ) -> Result<usize> {
        if self.path.contains(&component.item_id) {
            return Err(FabricationError::RecipeCycle(component.item_id.clone()));
        }
        let catalog = self.catalog;
        let item = catalog.get(&component.item_id)?;
        let required = component_quantity(component, parent_quantity)?;

        let filter = component.filter();
        let available = self
            .stock
            .obtainable(&filter, Pool::Available)
            .min(required);
        self.stock.withdraw(&filter, available, Pool::Available)?;

        let recoverable = self.claim_recovery(component, required - available);
        let need = required - available - recoverable;

        let (need_to_manufacture, unmet) = match item.tier {
            Tier::RawMaterial => (0, need),
            _ if need == 0 => (0, 0),
            _ if item.recipe.is_empty() => {
                return Err(FabricationError::NotManufacturable(item.id.clone()));
            }
            _ => (need, 0),
        };

        let index = self.gaps.len();
        self.gaps.push(Gap {
            index,
            item_id: item.id.clone(),
            tier: item.tier,
            depth,
            parent,
            children: Vec::new(),
            required,
            available,
            recoverable,
            need_to_manufacture,
            unmet,
            required_tags: component.required_tags.clone(),
            quality_ceiling: component.quality_ceiling,
        });

        if need_to_manufacture > 0 {
            self.path.push(item.id.clone());
            for child in &item.recipe {
                let child_index = self.visit(child, need_to_manufacture, depth + 1, Some(index))?;
                self.gaps[index].children.push(child_index);
            }
            self.path.pop();
        }
        Ok(index)
    }

    fn claim_recovery(&mut self, component: &RecipeComponent, wanted: u32) -> u32 {
        let filter = component.filter();
        let mut claimed = 0;
        for recovery in self.recoveries.iter_mut() {
            if claimed == wanted {
                break;
            }
            let sample = ItemInstance {
                item_id: recovery.item_id.clone(),
                quantity: recovery.expected_quantity,
                quality: recovery.quality,
                tags: recovery.tags.iter().cloned().collect(),
            };
            if recovery.expected_quantity == 0 || !filter.matches(&sample) {
                continue;
            }
            let take = recovery.expected_quantity.min(wanted - claimed);
            recovery.expected_quantity -= take;
            claimed += take;
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::models::BaseItem;

    #[test]
    fn test_empty_stock_two_levels() {
        let empty = Inventory::new();
        let report = analyze_gaps(&fixtures::catalog(), "drive_unit", 1, &empty, &[]).unwrap();
        let roots: Vec<&str> = report.roots().map(|g| g.item_id.as_str()).collect();
        assert_eq!(roots, vec!["gearbox", "motor"]);

        let manufactured: Vec<&str> = report
            .manufacture_order()
            .into_iter()
            .map(|i| report.gaps[i].item_id.as_str())
            .collect();
        assert_eq!(
            manufactured,
            vec!["gear", "shaft", "housing", "gearbox", "coil", "shaft", "housing", "motor"]
        );
        // 2 gears × 2 steel + 1 shaft + 1 shaft
        let raw = report.raw_requirements().unwrap();
        assert_eq!(raw.get("steel_bar"), Some(&6));
        assert_eq!(report.unmet().get("copper_wire"), Some(&3));
        assert!((report.fresh_fraction() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_full_stock_needs_nothing() {
        let stock = fixtures::stock_for_drive_unit();
        let report = analyze_gaps(&fixtures::catalog(), "drive_unit", 1, &stock, &[]).unwrap();
        assert!(report.is_fully_covered());
        assert!(report.manufacture_order().is_empty());
        assert_eq!(report.gaps.len(), 2);
        assert_eq!(report.fresh_fraction(), 0.0);
    }

    #[test]
    fn test_stock_is_a_budget() {
        // One shaft in stock: the gearbox claims it, the motor's shaft is made.
        let stock = Inventory::new().with_item(ItemInstance::new("shaft", 1));
        let report = analyze_gaps(&fixtures::catalog(), "drive_unit", 1, &stock, &[]).unwrap();
        let shafts: Vec<&Gap> = report
            .gaps
            .iter()
            .filter(|g| g.item_id == "shaft")
            .collect();
        assert_eq!(shafts.len(), 2);
        assert_eq!(shafts[0].available, 1);
        assert_eq!(shafts[0].need_to_manufacture, 0);
        assert_eq!(shafts[1].available, 0);
        assert_eq!(shafts[1].need_to_manufacture, 1);
    }

    #[test]
    fn test_recovery_counts_before_manufacture() {
        let recovery = ComponentRecovery {
            item_id: "gear".into(),
            expected_quantity: 1,
            quality: 68.0,
            confidence: 0.7,
            tags: vec!["salvaged".into()],
            quality_ceiling: None,
        };
        let stock = Inventory::new();
        let report = analyze_gaps(&fixtures::catalog(), "gearbox", 1, &stock, &[recovery]).unwrap();
        let gear = report.gaps.iter().find(|g| g.item_id == "gear").unwrap();
        assert_eq!(gear.required, 2);
        assert_eq!(gear.recoverable, 1);
        assert_eq!(gear.need_to_manufacture, 1);
        let steel = &report.gaps[gear.children[0]];
        assert_eq!(steel.required, 2);
    }

    #[test]
    fn test_tagged_requirement_filters_stock() {
        let catalog = fixtures::catalog().with_item(
            BaseItem::assembly("precision_box")
                .with_component(RecipeComponent::new("gear", 1).with_tag("precision")),
        );
        let stock = Inventory::new().with_item(ItemInstance::new("gear", 5));
        let report = analyze_gaps(&catalog, "precision_box", 1, &stock, &[]).unwrap();
        assert_eq!(report.gaps[0].available, 0);
        assert_eq!(report.gaps[0].need_to_manufacture, 1);
    }

    #[test]
    fn test_quality_ceiling_filters_stock() {
        let catalog = fixtures::catalog().with_item(
            BaseItem::assembly("budget_box")
                .with_component(RecipeComponent::new("gear", 1).with_quality_ceiling(50.0)),
        );
        let stock = Inventory::new()
            .with_item(ItemInstance::new("gear", 1))
            .with_item(ItemInstance::new("gear", 1).with_quality(40.0));
        let report = analyze_gaps(&catalog, "budget_box", 1, &stock, &[]).unwrap();
        assert_eq!(report.gaps[0].available, 1);
    }

    #[test]
    fn test_definition_errors() {
        let catalog = fixtures::catalog()
            .with_item(BaseItem::shaped("mystery_part"))
            .with_item(BaseItem::assembly("bad_box").with_input("mystery_part", 1))
            .with_item(BaseItem::assembly("loop_a").with_input("loop_b", 1))
            .with_item(BaseItem::assembly("loop_b").with_input("loop_a", 1))
            .with_item(BaseItem::assembly("ghost_box").with_input("ghost", 1));
        let stock = Inventory::new();

        assert_eq!(
            analyze_gaps(&catalog, "steel_bar", 1, &stock, &[]).unwrap_err(),
            FabricationError::NotManufacturable("steel_bar".into())
        );
        assert_eq!(
            analyze_gaps(&catalog, "bad_box", 1, &stock, &[]).unwrap_err(),
            FabricationError::NotManufacturable("mystery_part".into())
        );
        assert_eq!(
            analyze_gaps(&catalog, "loop_a", 1, &stock, &[]).unwrap_err(),
            FabricationError::RecipeCycle("loop_a".into())
        );
        assert_eq!(
            analyze_gaps(&catalog, "ghost_box", 1, &stock, &[]).unwrap_err(),
            FabricationError::UnknownItem("ghost".into())
        );
        assert!(matches!(
            analyze_gaps(&catalog, "gearbox", 0, &stock, &[]),
            Err(FabricationError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_overflowing_quantities_are_rejected() {
        let catalog = fixtures::catalog();
        let stock = Inventory::new();

        // gearbox: 2 gear per unit, 2 steel_bar per gear
        assert_eq!(
            analyze_gaps(&catalog, "gearbox", u32::MAX / 2, &stock, &[]).unwrap_err(),
            FabricationError::InvalidQuantity {
                item_id: "steel_bar".into(),
                quantity: u32::MAX - 1,
            }
        );

        // Each node fits, the 6 steel_bar per drive_unit summed across nodes do not.
        let report = analyze_gaps(&catalog, "drive_unit", u32::MAX / 5, &stock, &[]).unwrap();
        assert!(matches!(
            report.raw_requirements(),
            Err(FabricationError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_stock_snapshot_untouched() {
        let stock = fixtures::stock_for_drive_unit();
        let before = stock.clone();
        analyze_gaps(&fixtures::catalog(), "drive_unit", 1, &stock, &[]).unwrap();
        assert_eq!(stock, before);
    }
}
