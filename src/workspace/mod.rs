//! Facilities, job inventories and tick-by-tick execution.
//!
//! The workspace manager is the only component that moves material or
//! occupies machines. It owns every facility, and each facility owns its
//! active jobs; a job's private inventory is touched by nobody else.
//!
//! # Reservation modes
//!
//! | Mode | At creation | Later |
//! |------|-------------|-------|
//! | Legacy | every external input | top-up on material arrival |
//! | Dynamic | raw external inputs | others at start, raw shortfall at completion |
//!
//! # Terminal transition
//!
//! Completing, failing or cancelling a job drains its inventory back to
//! the facility, so a finished job never holds material.

mod cancellation;
mod execution;
mod facility;
mod materials;

pub use cancellation::RecoveryReport;
pub use execution::StartOutcome;
pub use facility::{Facility, FacilityView, InstalledEquipment};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{SimulationConfig, WorkspaceConfig};
use crate::error::{FabricationError, Result};
use crate::events::{EventBus, FabricationEvent};
use crate::models::{ItemInstance, Job, ManufacturingPlan, ReservationMode, Schedule, Tier};

/// Called once with the final record of a job that completed.
pub type CompletionCallback = Box<dyn FnOnce(&Job)>;

/// Caller settings for a new job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub priority: i32,
    pub rush: bool,
    /// Overrides the configured reservation mode.
    pub mode: Option<ReservationMode>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rush(mut self, rush: bool) -> Self {
        self.rush = rush;
        self
    }

    pub fn with_mode(mut self, mode: ReservationMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Everything needed to open a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOrder {
    pub plan: ManufacturingPlan,
    pub target_tier: Tier,
    /// Item ids treated as raw material.
    pub raw_items: BTreeSet<String>,
    /// Caller-supplied items moved into the job.
    pub inputs: Vec<ItemInstance>,
    pub options: JobOptions,
}

impl JobOrder {
    pub fn new(plan: ManufacturingPlan, target_tier: Tier) -> Self {
        Self {
            plan,
            target_tier,
            raw_items: BTreeSet::new(),
            inputs: Vec::new(),
            options: JobOptions::default(),
        }
    }

    pub fn with_raw_items(mut self, raw_items: BTreeSet<String>) -> Self {
        self.raw_items = raw_items;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<ItemInstance>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Owns facilities and runs their jobs.
pub struct WorkspaceManager {
    config: WorkspaceConfig,
    mode: ReservationMode,
    facilities: BTreeMap<String, Facility>,
    job_index: HashMap<String, String>,
    archived: HashMap<String, String>,
    callbacks: HashMap<String, CompletionCallback>,
    next_job: u64,
    rng: StdRng,
    log: Schedule,
}

impl WorkspaceManager {
    /// Creates an empty workspace seeded from `config`.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            config: config.workspace.clone(),
            mode: config.reservation_mode,
            facilities: BTreeMap::new(),
            job_index: HashMap::new(),
            archived: HashMap::new(),
            callbacks: HashMap::new(),
            next_job: 1,
            rng: StdRng::seed_from_u64(config.seed),
            log: Schedule::new(),
        }
    }

    /// Default reservation mode for new jobs.
    pub fn mode(&self) -> ReservationMode {
        self.mode
    }

    /// Adds (or replaces) a facility.
    pub fn add_facility(&mut self, facility: Facility) {
        info!(facility_id = %facility.id, "facility added");
        self.facilities.insert(facility.id.clone(), facility);
    }

    pub fn facility(&self, facility_id: &str) -> Result<&Facility> {
        self.facilities
            .get(facility_id)
            .ok_or_else(|| FabricationError::FacilityNotFound(facility_id.into()))
    }

    pub fn facility_mut(&mut self, facility_id: &str) -> Result<&mut Facility> {
        self.facilities
            .get_mut(facility_id)
            .ok_or_else(|| FabricationError::FacilityNotFound(facility_id.into()))
    }

    pub fn facilities(&self) -> impl Iterator<Item = &Facility> {
        self.facilities.values()
    }

    /// Facility ids in order.
    pub fn facility_ids(&self) -> Vec<String> {
        self.facilities.keys().cloned().collect()
    }

    /// Facility currently holding an active job.
    pub fn facility_of(&self, job_id: &str) -> Option<&str> {
        self.job_index.get(job_id).map(String::as_str)
    }

    /// Active or finished job by id.
    pub fn job(&self, job_id: &str) -> Option<&Job> {
        if let Some(facility_id) = self.job_index.get(job_id) {
            return self.facilities.get(facility_id)?.job(job_id);
        }
        let facility_id = self.archived.get(job_id)?;
        self.facilities.get(facility_id)?.archived_job(job_id)
    }

    /// Whether the job has reached a terminal state.
    pub fn is_finished(&self, job_id: &str) -> bool {
        self.archived.contains_key(job_id)
    }

    /// Active job ids of a facility.
    pub fn active_jobs(&self, facility_id: &str) -> Vec<String> {
        self.facilities
            .get(facility_id)
            .map(Facility::job_ids)
            .unwrap_or_default()
    }

    /// Every finished job across facilities.
    pub fn finished_jobs(&self) -> impl Iterator<Item = &Job> {
        self.facilities.values().flat_map(Facility::archived_jobs)
    }

    /// An active job with a readiness view over its facility.
    pub fn job_with_view(&mut self, job_id: &str) -> Option<(&mut Job, FacilityView<'_>)> {
        let facility_id = self.job_index.get(job_id)?;
        self.facilities.get_mut(facility_id)?.split_job(job_id)
    }

    /// Execution log of every machine run.
    pub fn schedule(&self) -> &Schedule {
        &self.log
    }

    /// Earliest estimated completion across all machines.
    pub fn next_completion_ms(&self) -> Option<i64> {
        self.facilities
            .values()
            .filter_map(Facility::next_completion_ms)
            .min()
    }

    /// Registers a callback for when the job completes.
    ///
    /// Replaces any earlier callback. Not invoked on failure or
    /// cancellation.
    pub fn on_completion(&mut self, job_id: &str, callback: CompletionCallback) -> Result<()> {
        if !self.job_index.contains_key(job_id) {
            return Err(self.missing_job(job_id));
        }
        self.callbacks.insert(job_id.to_string(), callback);
        Ok(())
    }

    /// Opens a job in a facility and makes its initial reservation.
    ///
    /// Caller inputs move into the job first; external inputs not covered
    /// by them are then reserved from stock per the job's mode. Whatever
    /// stock cannot cover leaves the job blocked, not failed.
    pub fn create_job(
        &mut self,
        facility_id: &str,
        order: JobOrder,
        now_ms: i64,
        bus: &mut EventBus,
    ) -> Result<String> {
        if order.plan.operations.is_empty() {
            return Err(FabricationError::InvalidPlan(format!(
                "plan for '{}' has no operations",
                order.plan.target_id
            )));
        }
        let job_id = format!("JOB-{:04}", self.next_job);
        let mode = order.options.mode.unwrap_or(self.mode);
        let facility = self.facility_mut(facility_id)?;

        let mut job = Job::new(&job_id, facility_id, order.plan, order.target_tier, now_ms)
            .with_priority(order.options.priority)
            .with_rush(order.options.rush)
            .with_mode(mode);
        job.raw_items = order.raw_items;

        job.ledger.record_reserved(&order.inputs);
        for input in order.inputs {
            job.inventory.deposit_reserved(input);
        }
        let moved = materials::reserve_outstanding(&mut job, &mut facility.inventory)?;

        debug!(
            job_id = %job.id,
            facility_id,
            mode = ?mode,
            units = moved.iter().map(|i| i.quantity).sum::<u32>(),
            "initial reservation"
        );
        info!(
            job_id = %job.id,
            facility_id,
            target = %job.plan.target_id,
            operations = job.plan.operation_count(),
            "job created"
        );

        facility.jobs.insert(job_id.clone(), job);
        self.job_index.insert(job_id.clone(), facility_id.into());
        self.next_job += 1;
        bus.publish(FabricationEvent::JobCreated {
            job_id: job_id.clone(),
            facility_id: facility_id.to_string(),
        });
        Ok(job_id)
    }

    fn missing_job(&self, job_id: &str) -> FabricationError {
        if self.archived.contains_key(job_id) {
            FabricationError::JobTerminal(job_id.to_string())
        } else {
            FabricationError::JobNotFound(job_id.to_string())
        }
    }
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("mode", &self.mode)
            .field("facilities", &self.facilities.keys().collect::<Vec<_>>())
            .field("active_jobs", &self.job_index.len())
            .field("finished_jobs", &self.archived.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::models::{CapabilityRequirement, Inventory, MaterialSpec, Operation, OperationKind};

    fn gear_plan() -> ManufacturingPlan {
        ManufacturingPlan::new("gear", 1).with_operation(
            Operation::new(
                "OP-001",
                OperationKind::Shaping,
                CapabilityRequirement::new("machining", 10.0),
            )
            .with_duration(60_000)
            .consuming(MaterialSpec::new("steel_bar", 2))
            .producing(MaterialSpec::new("gear", 1)),
        )
    }

    fn order() -> JobOrder {
        JobOrder::new(gear_plan(), Tier::ShapedMaterial)
            .with_raw_items(BTreeSet::from(["steel_bar".to_string()]))
    }

    fn workspace() -> WorkspaceManager {
        let mut workspace = WorkspaceManager::new(&SimulationConfig::default());
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 5));
        workspace.add_facility(Facility::new("F1").with_inventory(stock));
        workspace
    }

    #[test]
    fn test_create_job_reserves_and_announces() {
        let mut ws = workspace();
        let mut bus = EventBus::new();
        let id = ws.create_job("F1", order(), 100, &mut bus).unwrap();

        assert_eq!(id, "JOB-0001");
        let job = ws.job(&id).unwrap();
        assert_eq!(job.inventory.reserved("steel_bar"), 2);
        assert_eq!(job.created_at_ms, 100);
        let stock = &ws.facility("F1").unwrap().inventory;
        assert_eq!(stock.available("steel_bar"), 3);
        assert_eq!(ws.facility_of(&id), Some("F1"));
        assert_eq!(bus.drain_pending()[0].kind(), EventKind::JobCreated);
    }

    #[test]
    fn test_caller_inputs_cover_needs() {
        let mut ws = workspace();
        let mut bus = EventBus::new();
        let order = order().with_inputs(vec![ItemInstance::new("steel_bar", 2).with_quality(70.0)]);
        let id = ws.create_job("F1", order, 0, &mut bus).unwrap();

        assert_eq!(ws.job(&id).unwrap().inventory.quantity("steel_bar"), 2);
        let stock = &ws.facility("F1").unwrap().inventory;
        assert_eq!(stock.available("steel_bar"), 5);
    }

    #[test]
    fn test_create_job_errors() {
        let mut ws = workspace();
        let mut bus = EventBus::new();
        let err = ws.create_job("F9", order(), 0, &mut bus).unwrap_err();
        assert_eq!(err, FabricationError::FacilityNotFound("F9".into()));

        let empty = JobOrder::new(ManufacturingPlan::new("gear", 1), Tier::ShapedMaterial);
        assert!(matches!(
            ws.create_job("F1", empty, 0, &mut bus),
            Err(FabricationError::InvalidPlan(_))
        ));
        assert_eq!(bus.pending_len(), 0);
    }

    #[test]
    fn test_job_ids_increase() {
        let mut ws = workspace();
        let mut bus = EventBus::new();
        let a = ws.create_job("F1", order(), 0, &mut bus).unwrap();
        let b = ws.create_job("F1", order(), 0, &mut bus).unwrap();
        assert!(a < b);
        assert_eq!(ws.active_jobs("F1"), vec![a, b]);
    }

    #[test]
    fn test_on_completion_requires_active_job() {
        let mut ws = workspace();
        assert!(matches!(
            ws.on_completion("JOB-0042", Box::new(|_: &Job| {})),
            Err(FabricationError::JobNotFound(_))
        ));
    }
}
