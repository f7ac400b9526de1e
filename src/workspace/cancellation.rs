//! Job cancellation and material recovery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::execution::finish_job;
use super::WorkspaceManager;
use crate::error::{FabricationError, Result};
use crate::events::EventBus;
use crate::models::{ItemInstance, JobState};

/// What a cancelled job gives back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub job_id: String,
    /// Instances returned to facility stock, qualities and tags intact.
    pub items: Vec<ItemInstance>,
    /// Units per item id.
    pub totals: BTreeMap<String, u32>,
    pub operations_completed: usize,
    pub operations_total: usize,
    pub elapsed_ms: i64,
}

impl RecoveryReport {
    /// Units recovered across all items.
    pub fn total_units(&self) -> u32 {
        self.totals.values().sum()
    }
}

impl WorkspaceManager {
    /// Reports what cancelling `job_id` now would recover, without acting.
    pub fn preview_cancellation(&self, job_id: &str, now_ms: i64) -> Result<RecoveryReport> {
        let facility_id = self
            .job_index
            .get(job_id)
            .ok_or_else(|| self.missing_job(job_id))?;
        let job = self
            .facility(facility_id)?
            .job(job_id)
            .ok_or_else(|| FabricationError::JobNotFound(job_id.to_string()))?;
        let items: Vec<ItemInstance> = job
            .inventory
            .slots()
            .flat_map(|slot| slot.stacks.iter().cloned())
            .collect();
        Ok(RecoveryReport {
            job_id: job_id.to_string(),
            items,
            totals: job.inventory.totals(),
            operations_completed: job.completed_operations(),
            operations_total: job.sub_operations.len(),
            elapsed_ms: job.elapsed_ms(now_ms),
        })
    }

    /// Cancels an active job.
    ///
    /// Running operations are abandoned and their machines freed. Everything
    /// in the job's inventory, reserved inputs and intermediates alike,
    /// returns to facility stock.
    pub fn cancel_job(
        &mut self,
        job_id: &str,
        now_ms: i64,
        bus: &mut EventBus,
    ) -> Result<RecoveryReport> {
        let report = self.preview_cancellation(job_id, now_ms)?;
        let facility_id = self
            .job_index
            .remove(job_id)
            .ok_or_else(|| FabricationError::JobNotFound(job_id.to_string()))?;
        let Self {
            facilities,
            archived,
            callbacks,
            log,
            ..
        } = self;
        let facility = facilities
            .get_mut(&facility_id)
            .ok_or_else(|| FabricationError::FacilityNotFound(facility_id.clone()))?;
        let Some(mut job) = facility.jobs.remove(job_id) else {
            return Err(FabricationError::JobNotFound(job_id.to_string()));
        };
        job.last_reason = Some("cancelled".to_string());
        finish_job(
            facility,
            job,
            JobState::Cancelled,
            now_ms,
            callbacks,
            log,
            bus,
        );
        archived.insert(job_id.to_string(), facility_id);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::events::{EventKind, FabricationEvent};
    use crate::fixtures;
    use crate::models::{
        CapabilityRequirement, Inventory, ManufacturingPlan, MaterialSpec, Operation, OperationKind,
        Tier,
    };
    use crate::workspace::{Facility, JobOrder, StartOutcome};
    use std::collections::BTreeSet;

    const LATHE: &str = "F1/lathe_basic#1";

    fn step(id: &str, input: (&str, u32), output: (&str, u32)) -> Operation {
        let requirement = CapabilityRequirement::new("machining", 5.0);
        Operation::new(id, OperationKind::Shaping, requirement)
            .with_duration(1000)
            .consuming(MaterialSpec::new(input.0, input.1))
            .producing(MaterialSpec::new(output.0, output.1))
    }

    fn start(
        ws: &mut WorkspaceManager,
        bus: &mut EventBus,
        id: &str,
        index: usize,
        now_ms: i64,
    ) -> Result<StartOutcome> {
        ws.start_operation("F1", id, LATHE, index, now_ms, bus)
    }

    fn three_step() -> ManufacturingPlan {
        ManufacturingPlan::new("gear", 1)
            .with_operation(step("OP-001", ("steel_bar", 3), ("blank", 2)))
            .with_operation(step("OP-002", ("blank", 2), ("rough_gear", 1)))
            .with_operation(step("OP-003", ("rough_gear", 1), ("gear", 1)))
    }

    fn workspace() -> (WorkspaceManager, EventBus, String) {
        let config = SimulationConfig::default().without_default_failures();
        let mut ws = WorkspaceManager::new(&config);
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 3));
        let mut facility = Facility::new("F1").with_inventory(stock);
        facility.install("lathe_basic");
        ws.add_facility(facility);
        let mut bus = EventBus::new();
        ws.sync_equipment(&fixtures::equipment(), 0, &mut bus);
        let order = JobOrder::new(three_step(), Tier::ShapedMaterial)
            .with_raw_items(BTreeSet::from(["steel_bar".to_string()]));
        let id = ws.create_job("F1", order, 0, &mut bus).unwrap();
        (ws, bus, id)
    }

    #[test]
    fn test_cancel_mid_job_returns_intermediates() {
        let (mut ws, mut bus, id) = workspace();
        start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        ws.advance(1000, &mut bus).unwrap();
        start(&mut ws, &mut bus, &id, 1, 1000).unwrap();

        let preview = ws.preview_cancellation(&id, 1500).unwrap();
        assert_eq!(preview.totals.get("blank"), Some(&2));
        assert_eq!(preview.operations_completed, 1);
        assert_eq!(preview.operations_total, 3);
        assert_eq!(preview.elapsed_ms, 1500);

        bus.drain_pending();
        let report = ws.cancel_job(&id, 1500, &mut bus).unwrap();
        assert_eq!(report, preview);
        assert_eq!(report.total_units(), 2);

        let facility = ws.facility("F1").unwrap();
        assert_eq!(facility.inventory.available("blank"), 2);
        assert!(facility.machines[LATHE].is_idle());
        assert_eq!(facility.cancelled.len(), 1);

        let job = ws.job(&id).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.inventory.is_empty());
        assert_eq!(job.finished_at_ms, Some(1500));

        let events = bus.drain_pending();
        assert!(events.iter().any(|e| e.kind() == EventKind::MachineFreed));
        assert!(matches!(
            events.last(),
            Some(FabricationEvent::JobFinished {
                state: JobState::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_ledger_balances_after_cancel() {
        let (mut ws, mut bus, id) = workspace();
        start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        ws.advance(1000, &mut bus).unwrap();
        ws.cancel_job(&id, 1000, &mut bus).unwrap();

        let ledger = &ws.job(&id).unwrap().ledger;
        for item in ["steel_bar", "blank"] {
            assert_eq!(ledger.balance(item), 0, "{item}");
        }
        assert_eq!(ledger.reserved.get("steel_bar"), Some(&3));
        assert_eq!(ledger.consumed.get("steel_bar"), Some(&3));
    }

    #[test]
    fn test_cancel_twice_reports_terminal() {
        let (mut ws, mut bus, id) = workspace();
        ws.cancel_job(&id, 0, &mut bus).unwrap();
        assert_eq!(
            ws.cancel_job(&id, 10, &mut bus).unwrap_err(),
            FabricationError::JobTerminal(id.clone())
        );
        assert_eq!(
            ws.preview_cancellation("JOB-0099", 0).unwrap_err(),
            FabricationError::JobNotFound("JOB-0099".into())
        );
    }

    #[test]
    fn test_cancel_skips_completion_callback() {
        use std::cell::Cell;
        use std::rc::Rc;

        let (mut ws, mut bus, id) = workspace();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        ws.on_completion(&id, Box::new(move |_: &crate::models::Job| flag.set(true)))
            .unwrap();
        ws.cancel_job(&id, 0, &mut bus).unwrap();
        assert!(!fired.get());
    }
}
