//! Material movement between facility stock and job inventories.
//!
//! Units only ever move: a withdrawal from one inventory is followed by a
//! deposit into another, and every move into a job is recorded in its
//! ledger.

use std::collections::HashMap;

use tracing::{debug, info};

use super::WorkspaceManager;
use crate::error::{FabricationError, InventoryError, Result};
use crate::events::{EventBus, FabricationEvent};
use crate::models::{
    Inventory, ItemFilter, ItemInstance, Job, MaterialSpec, Pool, ReservationMode,
    SubOperationState,
};

fn claim(claims: &mut HashMap<String, u32>, item_id: &str, obtainable: u32, wanted: u32) -> u32 {
    let used = claims.entry(item_id.to_string()).or_insert(0);
    let take = obtainable.saturating_sub(*used).min(wanted);
    *used += take;
    take
}

/// Inputs of operation `index` that cannot be obtained.
///
/// Looks at the job's inventory first. In dynamic mode the facility
/// `stock`, when given, covers the rest.
pub(crate) fn shortfall(job: &Job, index: usize, stock: Option<&Inventory>) -> Vec<MaterialSpec> {
    let Some(op) = job.operation(index) else {
        return Vec::new();
    };
    let stock = stock.filter(|_| job.mode == ReservationMode::Dynamic);
    let mut local_claims = HashMap::new();
    let mut stock_claims = HashMap::new();
    let mut missing = Vec::new();

    for need in &op.consumes {
        let filter = need.filter();
        let mut left = need.quantity;
        left -= claim(
            &mut local_claims,
            &need.item_id,
            job.inventory.obtainable(&filter, Pool::Any),
            left,
        );
        if let Some(stock) = stock {
            left -= claim(
                &mut stock_claims,
                &need.item_id,
                stock.obtainable(&filter, Pool::Available),
                left,
            );
        }
        if left > 0 {
            let mut spec = need.clone();
            spec.quantity = left;
            missing.push(spec);
        }
    }
    missing
}

/// External inputs of the unfinished operations not yet in the job's
/// inventory.
pub(crate) fn remaining_external(job: &Job) -> Vec<MaterialSpec> {
    let specs = job.plan.external_inputs_where(|i| {
        job.sub_operations
            .get(i)
            .is_some_and(|s| s.state != SubOperationState::Completed)
    });
    let mut claims = HashMap::new();
    specs
        .into_iter()
        .filter_map(|mut spec| {
            let have = claim(
                &mut claims,
                &spec.item_id,
                job.inventory.obtainable(&spec.filter(), Pool::Any),
                spec.quantity,
            );
            spec.quantity -= have;
            (spec.quantity > 0).then_some(spec)
        })
        .collect()
}

/// Moves as much of `specs` as `stock` holds into the job, reserved.
fn transfer(
    job: &mut Job,
    stock: &mut Inventory,
    specs: Vec<MaterialSpec>,
) -> std::result::Result<Vec<ItemInstance>, InventoryError> {
    let mut moved = Vec::new();
    for spec in specs {
        let filter = spec.filter();
        let n = stock
            .obtainable(&filter, Pool::Available)
            .min(spec.quantity);
        if n == 0 {
            continue;
        }
        for item in stock.withdraw(&filter, n, Pool::Available)? {
            job.inventory.deposit_reserved(item.clone());
            moved.push(item);
        }
    }
    job.ledger.record_reserved(&moved);
    Ok(moved)
}

/// Reserves the job's outstanding external inputs from `stock`.
///
/// Legacy jobs take everything; dynamic jobs take raw materials only.
pub(crate) fn reserve_outstanding(
    job: &mut Job,
    stock: &mut Inventory,
) -> Result<Vec<ItemInstance>> {
    let wanted: Vec<MaterialSpec> = remaining_external(job)
        .into_iter()
        .filter(|s| {
            job.mode == ReservationMode::Legacy || job.is_raw(&s.item_id)
        })
        .collect();
    Ok(transfer(job, stock, wanted)?)
}

/// Pulls the missing inputs of operation `index` whose rawness passes
/// `pick`.
pub(crate) fn pull_for_operation(
    job: &mut Job,
    index: usize,
    stock: &mut Inventory,
    pick: impl Fn(bool) -> bool,
) -> Result<Vec<ItemInstance>> {
    let wanted: Vec<MaterialSpec> = shortfall(job, index, None)
        .into_iter()
        .filter(|s| pick(job.is_raw(&s.item_id)))
        .collect();
    Ok(transfer(job, stock, wanted)?)
}

impl WorkspaceManager {
    /// Deposits externally acquired stock and announces it.
    pub fn receive_materials(
        &mut self,
        facility_id: &str,
        items: Vec<ItemInstance>,
        bus: &mut EventBus,
    ) -> Result<()> {
        if let Some(empty) = items.iter().find(|i| i.quantity == 0) {
            return Err(FabricationError::InvalidQuantity {
                item_id: empty.item_id.clone(),
                quantity: 0,
            });
        }
        let facility = self.facility_mut(facility_id)?;
        let mut item_ids: Vec<String> = items.iter().map(|i| i.item_id.clone()).collect();
        item_ids.sort();
        item_ids.dedup();
        let units: u32 = items.iter().map(|i| i.quantity).sum();
        for item in items {
            facility.inventory.deposit(item);
        }
        info!(facility_id, units, "materials received");
        bus.publish(FabricationEvent::MaterialsArrived {
            facility_id: facility_id.to_string(),
            item_ids,
        });
        Ok(())
    }

    /// Tops up every active job's outstanding reservations from stock.
    ///
    /// Jobs are served in creation order. Returns the units moved.
    pub fn replenish(&mut self, facility_id: &str) -> Result<u32> {
        let facility = self.facility_mut(facility_id)?;
        let mut total = 0;
        for job in facility.jobs.values_mut() {
            let moved = reserve_outstanding(job, &mut facility.inventory)?;
            let units: u32 = moved.iter().map(|i| i.quantity).sum();
            if units > 0 {
                debug!(
                    job_id = %job.id,
                    facility_id,
                    units,
                    "reservation topped up"
                );
            }
            total += units;
        }
        Ok(total)
    }

    /// Removes available stock for an outside consumer.
    pub fn withdraw_for_fulfillment(
        &mut self,
        facility_id: &str,
        item_id: &str,
        quantity: u32,
    ) -> Result<Vec<ItemInstance>> {
        if quantity == 0 {
            return Err(FabricationError::InvalidQuantity {
                item_id: item_id.to_string(),
                quantity,
            });
        }
        let facility = self.facility_mut(facility_id)?;
        let items = facility
            .inventory
            .withdraw(&ItemFilter::any(item_id), quantity, Pool::Available)?;
        info!(
            facility_id,
            item_id,
            quantity,
            "stock withdrawn for fulfillment"
        );
        Ok(items)
    }
}
