//! Simulation context.
//!
//! [`Simulation`] binds the catalogs and configuration to one event bus,
//! workspace, state manager and coordinator. Independent simulations share
//! nothing.
//!
//! # Tick
//!
//! 1. Apply equipment changes.
//! 2. Complete due machine runs.
//! 3. Route the resulting events (state refreshes, top-ups).
//! 4. Re-score the ready queue.
//! 5. Dispatch ready operations to idle machines, facility by facility.
//! 6. Launch opportunistic operations of dynamic jobs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SimulationConfig;
use crate::dispatching::PriorityEngine;
use crate::error::{FabricationError, Result};
use crate::events::{EventBus, FabricationEvent};
use crate::models::{EquipmentCatalog, ItemCatalog, ItemInstance, Job, ManufacturingPlan, Schedule};
use crate::planning::{GeneratedPlan, PlanRequest, WorkflowGenerator};
use crate::scheduler::{JobAssignmentCoordinator, JobStateManager, ProductionKpi, ReadyOperation};
use crate::validation::{describe, validate_plan};
use crate::workspace::{
    CompletionCallback, Facility, JobOptions, JobOrder, RecoveryReport, StartOutcome,
    WorkspaceManager,
};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub now_ms: i64,
    /// Machine runs that ended, whatever their outcome.
    pub completed_operations: usize,
    /// Operations that began occupying a machine.
    pub started_operations: usize,
    /// Jobs that reached a terminal state.
    pub finished_jobs: usize,
}

/// A self-contained manufacturing simulation.
pub struct Simulation {
    config: SimulationConfig,
    items: ItemCatalog,
    equipment: EquipmentCatalog,
    bus: EventBus,
    workspace: WorkspaceManager,
    states: JobStateManager,
    coordinator: JobAssignmentCoordinator,
    now_ms: i64,
}

impl Simulation {
    /// Creates a simulation at time zero.
    ///
    /// # Errors
    /// `Config` when the configuration is out of range.
    pub fn new(
        config: SimulationConfig,
        items: ItemCatalog,
        equipment: EquipmentCatalog,
    ) -> Result<Self> {
        config.validate()?;
        let workspace = WorkspaceManager::new(&config);
        let states = JobStateManager::new(PriorityEngine::from_config(&config.priority));
        Ok(Self {
            config,
            items,
            equipment,
            bus: EventBus::new(),
            workspace,
            states,
            coordinator: JobAssignmentCoordinator::new(),
            now_ms: 0,
        })
    }

    /// Adds a facility; its installed equipment is synced immediately.
    pub fn add_facility(&mut self, facility: Facility) -> Result<()> {
        for installed in &facility.installed {
            self.equipment.get(&installed.equipment_id)?;
        }
        self.workspace.add_facility(facility);
        self.workspace
            .sync_equipment(&self.equipment, self.now_ms, &mut self.bus);
        self.process_events(&mut TickSummary::default())
    }

    /// Installs catalog equipment; it becomes usable on the next tick.
    pub fn install_equipment(&mut self, facility_id: &str, equipment_id: &str) -> Result<String> {
        self.equipment.get(equipment_id)?;
        let facility = self.workspace.facility_mut(facility_id)?;
        Ok(facility.install(equipment_id))
    }

    /// Removes an installation on the next tick. Returns whether it existed.
    pub fn uninstall_equipment(
        &mut self,
        facility_id: &str,
        installation_id: &str,
    ) -> Result<bool> {
        let facility = self.workspace.facility_mut(facility_id)?;
        Ok(facility.uninstall(installation_id))
    }

    /// Generates a plan against a facility's current stock.
    pub fn plan(&self, facility_id: &str, request: &PlanRequest) -> Result<GeneratedPlan> {
        let facility = self.workspace.facility(facility_id)?;
        WorkflowGenerator::new(&self.items, &self.config.planning)
            .generate(request, &facility.inventory)
    }

    /// Plans `request` and opens a job for it.
    pub fn submit(
        &mut self,
        facility_id: &str,
        request: PlanRequest,
        options: JobOptions,
    ) -> Result<String> {
        let generated = self.plan(facility_id, &request)?;
        self.accept_plan(facility_id, generated.plan, request.inputs, options)
    }

    /// Opens a job for an existing plan.
    ///
    /// `inputs` move into the job as reserved material.
    pub fn accept_plan(
        &mut self,
        facility_id: &str,
        plan: ManufacturingPlan,
        inputs: Vec<ItemInstance>,
        options: JobOptions,
    ) -> Result<String> {
        validate_plan(&plan, &self.items)
            .map_err(|errors| FabricationError::InvalidPlan(describe(&errors)))?;
        let target_tier = self.items.get(&plan.target_id)?.tier;
        let raw_items: BTreeSet<String> = plan
            .operations
            .iter()
            .flat_map(|op| &op.consumes)
            .filter(|spec| {
                self.items
                    .tier_of(&spec.item_id)
                    .is_some_and(|t| t.is_raw())
            })
            .map(|spec| spec.item_id.clone())
            .collect();

        let order = JobOrder::new(plan, target_tier)
            .with_raw_items(raw_items)
            .with_inputs(inputs)
            .with_options(options);
        let job_id = self
            .workspace
            .create_job(facility_id, order, self.now_ms, &mut self.bus)?;
        self.process_events(&mut TickSummary::default())?;
        Ok(job_id)
    }

    /// Registers a callback for when `job_id` completes.
    pub fn on_completion(&mut self, job_id: &str, callback: CompletionCallback) -> Result<()> {
        self.workspace.on_completion(job_id, callback)
    }

    /// Cancels a job, returning its material to the facility.
    ///
    /// Freed machines are offered to other jobs on the next tick.
    pub fn cancel(&mut self, job_id: &str) -> Result<RecoveryReport> {
        let report = self
            .workspace
            .cancel_job(job_id, self.now_ms, &mut self.bus)?;
        self.process_events(&mut TickSummary::default())?;
        Ok(report)
    }

    /// What cancelling `job_id` now would recover.
    pub fn preview_cancellation(&self, job_id: &str) -> Result<RecoveryReport> {
        self.workspace.preview_cancellation(job_id, self.now_ms)
    }

    /// Deposits externally acquired stock into a facility.
    ///
    /// Jobs it unblocks become ready at once and start on the next tick.
    pub fn receive_materials(&mut self, facility_id: &str, items: Vec<ItemInstance>) -> Result<()> {
        self.workspace
            .receive_materials(facility_id, items, &mut self.bus)?;
        self.process_events(&mut TickSummary::default())
    }

    /// Takes available stock out of a facility.
    pub fn withdraw_for_fulfillment(
        &mut self,
        facility_id: &str,
        item_id: &str,
        quantity: u32,
    ) -> Result<Vec<ItemInstance>> {
        self.workspace
            .withdraw_for_fulfillment(facility_id, item_id, quantity)
    }

    /// A job, active or finished.
    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.workspace.job(job_id)
    }

    pub fn facility(&self, facility_id: &str) -> Result<&Facility> {
        self.workspace.facility(facility_id)
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn states(&self) -> &JobStateManager {
        &self.states
    }

    pub fn coordinator(&self) -> &JobAssignmentCoordinator {
        &self.coordinator
    }

    /// Execution log.
    pub fn schedule(&self) -> &Schedule {
        self.workspace.schedule()
    }

    /// KPIs over every job seen so far.
    pub fn kpi(&self) -> ProductionKpi {
        let jobs = self
            .workspace
            .facilities()
            .flat_map(|f| f.jobs.values().chain(f.archived_jobs()));
        ProductionKpi::calculate(self.workspace.schedule(), jobs)
    }

    /// Event bus, for subscribing observers.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Advances the simulation to `now_ms`.
    ///
    /// # Errors
    /// `TimeRegression` when `now_ms` is earlier than the current time.
    pub fn tick(&mut self, now_ms: i64) -> Result<TickSummary> {
        if now_ms < self.now_ms {
            return Err(FabricationError::TimeRegression {
                current: self.now_ms,
                requested: now_ms,
            });
        }
        self.now_ms = now_ms;
        let mut summary = TickSummary {
            now_ms,
            ..TickSummary::default()
        };

        let changed = self
            .workspace
            .sync_equipment(&self.equipment, now_ms, &mut self.bus);
        for facility_id in &changed {
            self.refresh_facility(facility_id);
        }

        summary.completed_operations = self.workspace.advance(now_ms, &mut self.bus)?;
        self.process_events(&mut summary)?;
        self.states.resort(now_ms);

        for facility_id in self.workspace.facility_ids() {
            self.dispatch(&facility_id);
            self.process_events(&mut summary)?;
            self.workspace
                .scan_opportunistic(&facility_id, &mut self.bus)?;
            self.process_events(&mut summary)?;
        }

        debug!(
            now_ms,
            completed = summary.completed_operations,
            started = summary.started_operations,
            finished = summary.finished_jobs,
            "tick"
        );
        Ok(summary)
    }

    /// Ticks at every machine completion up to `end_ms`, then at `end_ms`.
    pub fn run_until(&mut self, end_ms: i64) -> Result<Vec<TickSummary>> {
        let mut ticks = vec![self.tick(self.now_ms)?];
        while let Some(next) = self.workspace.next_completion_ms().filter(|t| *t <= end_ms) {
            ticks.push(self.tick(next.max(self.now_ms))?);
        }
        if self.now_ms < end_ms {
            ticks.push(self.tick(end_ms)?);
        }
        Ok(ticks)
    }

    fn dispatch(&mut self, facility_id: &str) {
        let Ok(facility) = self.workspace.facility(facility_id) else {
            return;
        };
        let candidates: Vec<ReadyOperation> = self
            .states
            .ready_jobs(facility_id)
            .filter(|entry| {
                self.coordinator
                    .is_ready(facility_id, &entry.input.job_id)
            })
            .filter_map(|entry| {
                let job = facility.job(&entry.input.job_id)?;
                let index = *job.ready_operations.first()?;
                let op = job.operation(index)?;
                Some(ReadyOperation {
                    job_id: job.id.clone(),
                    facility_id: facility_id.to_string(),
                    operation_index: index,
                    requirement: op.requirement.clone(),
                    duration_ms: op.duration_ms,
                    priority: entry.score,
                })
            })
            .collect();
        if candidates.is_empty() {
            return;
        }
        let idle = facility.idle_machines();
        self.coordinator.assign(&candidates, &idle, &mut self.bus);
    }

    fn refresh_job(&mut self, job_id: &str) {
        let now_ms = self.now_ms;
        if let Some((job, view)) = self.workspace.job_with_view(job_id) {
            self.states.refresh(job, &view, &mut self.bus, now_ms);
        }
    }

    fn refresh_facility(&mut self, facility_id: &str) {
        for job_id in self.workspace.active_jobs(facility_id) {
            self.refresh_job(&job_id);
        }
    }

    /// Drains the bus mailbox, routing each event to the service that acts
    /// on it.
    fn process_events(&mut self, summary: &mut TickSummary) -> Result<()> {
        while let Some(event) = self.bus.next_pending() {
            match &event {
                FabricationEvent::JobCreated { job_id, .. }
                | FabricationEvent::OperationCompleted { job_id, .. }
                | FabricationEvent::OperationInterrupted { job_id, .. } => self.refresh_job(job_id),
                FabricationEvent::JobStarted {
                    job_id,
                    facility_id,
                    machine_id,
                    operation_index,
                    ..
                } => {
                    match self.workspace.start_operation(
                        facility_id,
                        job_id,
                        machine_id,
                        *operation_index,
                        self.now_ms,
                        &mut self.bus,
                    ) {
                        Ok(StartOutcome::Running) => summary.started_operations += 1,
                        Ok(StartOutcome::Skipped | StartOutcome::Deferred) => {}
                        Err(err) => warn!(
                            job_id = %job_id,
                            machine_id = %machine_id,
                            operation_index = *operation_index,
                            error = %err,
                            "dispatch could not start"
                        ),
                    }
                    self.refresh_job(job_id);
                }
                FabricationEvent::MachineFreed { facility_id, .. } => {
                    self.refresh_facility(facility_id)
                }
                FabricationEvent::MaterialsArrived { facility_id, .. } => {
                    self.workspace.replenish(facility_id)?;
                    self.refresh_facility(facility_id);
                }
                FabricationEvent::JobStateChanged { .. } => self.coordinator.notify(&event),
                FabricationEvent::JobFinished { job_id, state, .. } => {
                    self.coordinator.notify(&event);
                    self.states.on_job_finished(job_id, *state);
                    summary.finished_jobs += 1;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now_ms", &self.now_ms)
            .field("workspace", &self.workspace)
            .field("ready", &self.states.ready_len())
            .field("blocked", &self.states.blocked_len())
            .finish()
    }
}
