//! Inventory with per-item slots and reservation accounting.
//!
//! Each slot holds stacks of instances of one base item and two counters,
//! `available` and `reserved`. For every slot at all times:
//!
//! ```text
//! available + reserved == Σ stack quantities
//! ```
//!
//! Reservations are count-based: they earmark a quantity of the slot, not
//! specific stacks. Withdrawals remove whole or split stacks and hand them to
//! the caller by value, so a transfer between inventories is always a move.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ItemFilter, ItemInstance};
use crate::error::InventoryError;

/// Which counter a withdrawal draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Unreserved units only.
    Available,
    /// Reserved units only.
    Reserved,
    /// Reserved units first, then available ones.
    Any,
}

/// Stacks of one base item plus reservation counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySlot {
    /// Base item id.
    pub item_id: String,
    /// Instance stacks.
    pub stacks: Vec<ItemInstance>,
    /// Units free for new reservations.
    pub available: u32,
    /// Units earmarked.
    pub reserved: u32,
}

impl InventorySlot {
    fn new(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            ..Default::default()
        }
    }

    /// Sum of stack quantities.
    pub fn total(&self) -> u32 {
        self.stacks.iter().map(|s| s.quantity).sum()
    }

    /// Whether the counters agree with the stacks.
    pub fn is_consistent(&self) -> bool {
        self.available + self.reserved == self.total()
    }

    fn matching(&self, filter: &ItemFilter<'_>) -> u32 {
        self.stacks
            .iter()
            .filter(|s| filter.matches(s))
            .map(|s| s.quantity)
            .sum()
    }

    fn push(&mut self, instance: ItemInstance) {
        if let Some(stack) = self.stacks.iter_mut().find(|s| s.stacks_with(&instance)) {
            stack.quantity += instance.quantity;
        } else {
            self.stacks.push(instance);
        }
    }
}

/// Per-item slots of stacked instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    slots: BTreeMap<String, InventorySlot>,
}

impl Inventory {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposits an instance (builder).
    pub fn with_item(mut self, instance: ItemInstance) -> Self {
        self.deposit(instance);
        self
    }

    /// Deposits an instance as available stock.
    pub fn deposit(&mut self, instance: ItemInstance) {
        if instance.quantity == 0 {
            return;
        }
        let slot = self
            .slots
            .entry(instance.item_id.clone())
            .or_insert_with(|| InventorySlot::new(&instance.item_id));
        slot.available += instance.quantity;
        slot.push(instance);
        debug_assert!(
            slot.is_consistent(),
            "slot accounting broken for {}",
            slot.item_id
        );
    }

    /// Deposits an instance as reserved stock.
    pub fn deposit_reserved(&mut self, instance: ItemInstance) {
        if instance.quantity == 0 {
            return;
        }
        let slot = self
            .slots
            .entry(instance.item_id.clone())
            .or_insert_with(|| InventorySlot::new(&instance.item_id));
        slot.reserved += instance.quantity;
        slot.push(instance);
        debug_assert!(
            slot.is_consistent(),
            "slot accounting broken for {}",
            slot.item_id
        );
    }

    /// Total units of `item_id`.
    pub fn quantity(&self, item_id: &str) -> u32 {
        self.slots
            .get(item_id)
            .map(InventorySlot::total)
            .unwrap_or(0)
    }

    /// Unreserved units of `item_id`.
    pub fn available(&self, item_id: &str) -> u32 {
        self.slots.get(item_id).map(|s| s.available).unwrap_or(0)
    }

    /// Reserved units of `item_id`.
    pub fn reserved(&self, item_id: &str) -> u32 {
        self.slots.get(item_id).map(|s| s.reserved).unwrap_or(0)
    }

    /// Units passing `filter`, regardless of reservation.
    pub fn matching(&self, filter: &ItemFilter<'_>) -> u32 {
        self.slots
            .get(filter.item_id)
            .map(|s| s.matching(filter))
            .unwrap_or(0)
    }

    /// Units passing `filter` that a withdrawal from `pool` could obtain.
    pub fn obtainable(&self, filter: &ItemFilter<'_>, pool: Pool) -> u32 {
        let Some(slot) = self.slots.get(filter.item_id) else {
            return 0;
        };
        let pool_qty = match pool {
            Pool::Available => slot.available,
            Pool::Reserved => slot.reserved,
            Pool::Any => slot.available + slot.reserved,
        };
        slot.matching(filter).min(pool_qty)
    }

    /// Moves `quantity` of `item_id` from available to reserved.
    pub fn reserve(&mut self, item_id: &str, quantity: u32) -> Result<(), InventoryError> {
        let available = self.available(item_id);
        if available < quantity {
            return Err(InventoryError::Insufficient {
                item_id: item_id.to_string(),
                requested: quantity,
                available,
            });
        }
        if let Some(slot) = self.slots.get_mut(item_id) {
            slot.available -= quantity;
            slot.reserved += quantity;
            debug_assert!(slot.is_consistent());
        }
        Ok(())
    }

    /// Moves `quantity` of `item_id` from reserved back to available.
    pub fn release(&mut self, item_id: &str, quantity: u32) -> Result<(), InventoryError> {
        let reserved = self.reserved(item_id);
        if reserved < quantity {
            return Err(InventoryError::ReleaseExceedsReserved {
                item_id: item_id.to_string(),
                requested: quantity,
                reserved,
            });
        }
        if let Some(slot) = self.slots.get_mut(item_id) {
            slot.reserved -= quantity;
            slot.available += quantity;
            debug_assert!(slot.is_consistent());
        }
        Ok(())
    }

    /// Removes `quantity` units passing `filter` from `pool`.
    ///
    /// Either the full quantity is removed or nothing is.
    pub fn withdraw(
        &mut self,
        filter: &ItemFilter<'_>,
        quantity: u32,
        pool: Pool,
    ) -> Result<Vec<ItemInstance>, InventoryError> {
        if quantity == 0 {
            return Ok(Vec::new());
        }
        let obtainable = self.obtainable(filter, pool);
        if obtainable < quantity {
            return Err(InventoryError::Insufficient {
                item_id: filter.item_id.to_string(),
                requested: quantity,
                available: obtainable,
            });
        }
        let Some(slot) = self.slots.get_mut(filter.item_id) else {
            return Err(InventoryError::Insufficient {
                item_id: filter.item_id.to_string(),
                requested: quantity,
                available: 0,
            });
        };

        let mut remaining = quantity;
        let mut taken = Vec::new();
        for stack in slot.stacks.iter_mut() {
            if remaining == 0 {
                break;
            }
            if !filter.matches(stack) {
                continue;
            }
            let n = stack.quantity.min(remaining);
            let mut part = stack.clone();
            part.quantity = n;
            stack.quantity -= n;
            remaining -= n;
            taken.push(part);
        }
        slot.stacks.retain(|s| s.quantity > 0);

        match pool {
            Pool::Available => slot.available -= quantity,
            Pool::Reserved => slot.reserved -= quantity,
            Pool::Any => {
                let from_reserved = quantity.min(slot.reserved);
                slot.reserved -= from_reserved;
                slot.available -= quantity - from_reserved;
            }
        }
        debug_assert!(
            slot.is_consistent(),
            "slot accounting broken for {}",
            slot.item_id
        );

        if slot.stacks.is_empty() {
            self.slots.remove(filter.item_id);
        }
        Ok(taken)
    }

    /// Removes every instance, leaving the inventory empty.
    pub fn drain(&mut self) -> Vec<ItemInstance> {
        std::mem::take(&mut self.slots)
            .into_values()
            .flat_map(|slot| slot.stacks)
            .collect()
    }

    /// Slot for `item_id`.
    pub fn slot(&self, item_id: &str) -> Option<&InventorySlot> {
        self.slots.get(item_id)
    }

    /// All slots in item-id order.
    pub fn slots(&self) -> impl Iterator<Item = &InventorySlot> {
        self.slots.values()
    }

    /// Total units per item id.
    pub fn totals(&self) -> BTreeMap<String, u32> {
        self.slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.total()))
            .collect()
    }

    /// Total units across all slots.
    pub fn total_quantity(&self) -> u32 {
        self.slots.values().map(InventorySlot::total).sum()
    }

    /// Total reserved units across all slots.
    pub fn total_reserved(&self) -> u32 {
        self.slots.values().map(|s| s.reserved).sum()
    }

    /// Whether the inventory holds nothing.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether every slot satisfies the accounting invariant.
    pub fn is_consistent(&self) -> bool {
        self.slots.values().all(InventorySlot::is_consistent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stocked() -> Inventory {
        Inventory::new()
            .with_item(ItemInstance::new("steel_bar", 10))
            .with_item(ItemInstance::new("gear", 3).with_quality(60.0))
            .with_item(
                ItemInstance::new("gear", 2)
                    .with_tag("salvaged")
                    .with_quality(70.0),
            )
    }

    #[test]
    fn test_deposit_merges_stacks() {
        let mut inv = Inventory::new();
        inv.deposit(ItemInstance::new("steel_bar", 4));
        inv.deposit(ItemInstance::new("steel_bar", 6));
        assert_eq!(inv.quantity("steel_bar"), 10);
        assert_eq!(inv.slot("steel_bar").unwrap().stacks.len(), 1);
        assert!(inv.is_consistent());
    }

    #[test]
    fn test_reserve_and_release() {
        let mut inv = stocked();
        inv.reserve("steel_bar", 4).unwrap();
        assert_eq!(inv.available("steel_bar"), 6);
        assert_eq!(inv.reserved("steel_bar"), 4);
        assert!(inv.is_consistent());

        let err = inv.reserve("steel_bar", 7).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Insufficient { available: 6, .. }
        ));

        inv.release("steel_bar", 4).unwrap();
        assert_eq!(inv.reserved("steel_bar"), 0);
        assert!(inv.release("steel_bar", 1).is_err());
    }

    #[test]
    fn test_withdraw_respects_filter() {
        let mut inv = stocked();
        let tags = vec!["salvaged".to_string()];
        let filter = ItemFilter {
            item_id: "gear",
            tags: &tags,
            quality_ceiling: None,
        };
        assert_eq!(inv.matching(&filter), 2);
        let taken = inv.withdraw(&filter, 2, Pool::Available).unwrap();
        assert_eq!(taken.len(), 1);
        assert!(taken[0].tags.contains("salvaged"));
        assert_eq!(inv.quantity("gear"), 3);
        assert!(inv.withdraw(&filter, 1, Pool::Available).is_err());
        assert!(inv.is_consistent());
    }

    #[test]
    fn test_withdraw_splits_stack() {
        let mut inv = stocked();
        let steel = ItemFilter::any("steel_bar");
        let taken = inv.withdraw(&steel, 3, Pool::Available).unwrap();
        assert_eq!(taken[0].quantity, 3);
        assert_eq!(inv.quantity("steel_bar"), 7);
        assert!(inv.is_consistent());
    }

    #[test]
    fn test_withdraw_all_or_nothing() {
        let mut inv = stocked();
        let before = inv.clone();
        let steel = ItemFilter::any("steel_bar");
        assert!(inv.withdraw(&steel, 11, Pool::Any).is_err());
        assert_eq!(inv, before);
    }

    #[test]
    fn test_withdraw_pools() {
        let mut inv = Inventory::new();
        inv.deposit_reserved(ItemInstance::new("steel_bar", 3));
        inv.deposit(ItemInstance::new("steel_bar", 2));
        assert_eq!(inv.reserved("steel_bar"), 3);

        let steel = ItemFilter::any("steel_bar");
        assert!(inv.withdraw(&steel, 3, Pool::Available).is_err());
        let taken = inv.withdraw(&steel, 4, Pool::Any).unwrap();
        assert_eq!(taken.iter().map(|i| i.quantity).sum::<u32>(), 4);
        assert_eq!(inv.reserved("steel_bar"), 0);
        assert_eq!(inv.available("steel_bar"), 1);
        assert!(inv.is_consistent());
    }

    #[test]
    fn test_withdraw_last_unit_removes_slot() {
        let mut inv = Inventory::new().with_item(ItemInstance::new("shaft", 1));
        let shaft = ItemFilter::any("shaft");
        inv.withdraw(&shaft, 1, Pool::Available).unwrap();
        assert!(inv.slot("shaft").is_none());
        assert!(inv.is_empty());
    }

    #[test]
    fn test_drain_empties() {
        let mut inv = stocked();
        inv.reserve("steel_bar", 5).unwrap();
        let total = inv.total_quantity();
        let drained = inv.drain();
        assert_eq!(drained.iter().map(|i| i.quantity).sum::<u32>(), total);
        assert!(inv.is_empty());
        assert_eq!(inv.total_quantity(), 0);
    }

    #[test]
    fn test_totals() {
        let inv = stocked();
        let totals = inv.totals();
        assert_eq!(totals["gear"], 5);
        assert_eq!(totals["steel_bar"], 10);
        assert_eq!(inv.total_quantity(), 15);
        assert_eq!(inv.total_reserved(), 0);
    }

    #[test]
    fn test_zero_quantity_deposit_ignored() {
        let mut inv = Inventory::new();
        inv.deposit(ItemInstance::new("gear", 0));
        assert!(inv.is_empty());
    }
}
