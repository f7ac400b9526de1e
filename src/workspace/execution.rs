//! Machine runs: start, completion, interruption.
//!
//! # Completion
//!
//! 1. Roll against the operation's failure probability.
//! 2. On failure apply its policy: scrap ends the job, rework requeues the
//!    operation with its materials intact, downgrade lowers final quality
//!    and carries on.
//! 3. Otherwise consume inputs from the job's inventory and deposit the
//!    outputs there.
//! 4. When every operation is done, drain the job's inventory to the
//!    facility and mark it completed.

use std::cmp::Ordering;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use super::facility::Facility;
use super::materials::{pull_for_operation, shortfall};
use super::{CompletionCallback, WorkspaceManager};
use crate::error::{FabricationError, Result};
use crate::events::{EventBus, FabricationEvent};
use crate::models::{
    ActiveOperation, Assignment, EquipmentCatalog, FailurePolicy, Inventory, ItemInstance, Job,
    JobState, MachineSlot, OperationOutcome, Pool, ReservationMode, Schedule, SubOperationState,
};
use crate::scheduler::{compatibility, Dispatch};

/// What happened to a dispatched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Occupying its machine.
    Running,
    /// Conditional operation whose input was gone; marked done.
    Skipped,
    /// Could not start now; the job stays queued.
    Deferred,
}

enum Effect {
    Applied,
    Skipped,
    MissingInputs(String),
}

fn roll_failure(rng: &mut StdRng, probability: f64) -> bool {
    probability > 0.0 && rng.random::<f64>() < probability
}

fn describe_missing(job: &Job, index: usize) -> Option<String> {
    let missing = shortfall(job, index, None);
    if missing.is_empty() {
        return None;
    }
    let parts: Vec<String> = missing
        .iter()
        .map(|m| format!("{} x{}", m.item_id, m.quantity))
        .collect();
    Some(parts.join(", "))
}

/// Consumes the inputs of operation `index` and deposits its outputs.
fn apply_operation(job: &mut Job, index: usize, stock: &mut Inventory) -> Result<Effect> {
    let Some(op) = job.operation(index).cloned() else {
        return Err(FabricationError::InvalidPlan(format!(
            "{} has no operation at index {index}",
            job.id
        )));
    };
    if job.mode == ReservationMode::Dynamic {
        pull_for_operation(job, index, stock, |raw| raw)?;
    }
    if let Some(missing) = describe_missing(job, index) {
        if op.conditional {
            return Ok(Effect::Skipped);
        }
        let reason = format!("{}: missing {missing}", op.id);
        return Ok(Effect::MissingInputs(reason));
    }

    let mut consumed: Vec<ItemInstance> = Vec::new();
    for need in &op.consumes {
        let filter = need.filter();
        consumed.extend(job.inventory.withdraw(&filter, need.quantity, Pool::Any)?);
    }
    job.ledger.record_consumed(&consumed);

    let units: u32 = consumed.iter().map(|i| i.quantity).sum();
    let input_quality = if units == 0 {
        100.0
    } else {
        consumed
            .iter()
            .map(|i| i.quality * i.quantity as f64)
            .sum::<f64>()
            / units as f64
    };
    let is_final = index + 1 == job.plan.operations.len();

    let mut produced = Vec::new();
    for out in op.produces.iter().filter(|o| o.quantity > 0) {
        let mut quality = out.quality.unwrap_or(input_quality);
        if let Some(ceiling) = out.quality_ceiling {
            quality = quality.min(ceiling);
        }
        if is_final {
            quality *= job.quality_multiplier;
        }
        let mut item = ItemInstance::new(out.item_id.clone(), out.quantity)
            .with_quality(quality.clamp(0.0, 100.0));
        for tag in &out.tags {
            item = item.with_tag(tag.clone());
        }
        produced.push(item);
    }
    job.ledger.record_produced(&produced);
    for item in produced {
        job.inventory.deposit(item);
    }
    Ok(Effect::Applied)
}

/// Whether operation `index` finds its inputs in the job's inventory after
/// the inputs of every earlier unfinished operation are set aside.
fn inputs_free_for(job: &Job, index: usize) -> bool {
    let mut pool = job.inventory.clone();
    for (i, sub) in job.sub_operations.iter().enumerate().take(index) {
        if sub.state == SubOperationState::Completed {
            continue;
        }
        for need in &job.plan.operations[i].consumes {
            let filter = need.filter();
            let n = pool.obtainable(&filter, Pool::Any).min(need.quantity);
            if n > 0 && pool.withdraw(&filter, n, Pool::Any).is_err() {
                return false;
            }
        }
    }
    job.plan.operations[index]
        .consumes
        .iter()
        .all(|need| {
            pool.withdraw(&need.filter(), need.quantity, Pool::Any)
                .is_ok()
        })
}

/// Drains a job to its facility and files it under `state`.
///
/// Machines still running the job's operations are freed.
pub(super) fn finish_job(
    facility: &mut Facility,
    mut job: Job,
    state: JobState,
    now_ms: i64,
    callbacks: &mut HashMap<String, CompletionCallback>,
    log: &mut Schedule,
    bus: &mut EventBus,
) {
    for machine in facility.machines.values_mut() {
        if !machine.active.as_ref().is_some_and(|a| a.job_id == job.id) {
            continue;
        }
        let Some(active) = machine.interrupt(now_ms) else {
            continue;
        };
        if let Some(sub) = job.sub_operations.get_mut(active.operation_index) {
            sub.state = SubOperationState::Queued;
            sub.machine_id = None;
        }
        log.add_assignment(
            Assignment::new(
                &active.operation_id,
                &job.id,
                &machine.id,
                active.started_at_ms,
                now_ms,
            )
            .with_index(active.operation_index)
            .with_outcome(OperationOutcome::Interrupted),
        );
        bus.publish(FabricationEvent::MachineFreed {
            facility_id: facility.id.clone(),
            machine_id: machine.id.clone(),
        });
    }

    let recovered = job.inventory.drain();
    job.ledger.record_recovered(&recovered);
    let units: u32 = recovered.iter().map(|i| i.quantity).sum();
    for item in recovered {
        facility.inventory.deposit(item);
    }

    job.state = state;
    job.ready = false;
    job.ready_operations.clear();
    job.finished_at_ms = Some(now_ms);
    info!(
        job_id = %job.id,
        facility_id = %facility.id,
        state = %state,
        units_returned = units,
        reason = job.last_reason.as_deref().unwrap_or(""),
        "job finished"
    );

    if let Some(callback) = callbacks.remove(&job.id) {
        if state == JobState::Completed {
            callback(&job);
        }
    }
    bus.publish(FabricationEvent::JobFinished {
        job_id: job.id.clone(),
        facility_id: facility.id.clone(),
        state,
    });
    facility.archive(job);
}

impl WorkspaceManager {
    /// Applies equipment changes in every facility.
    ///
    /// Operations on removed machines are requeued without material loss.
    /// Returns the facilities whose capabilities changed.
    pub fn sync_equipment(
        &mut self,
        catalog: &EquipmentCatalog,
        now_ms: i64,
        bus: &mut EventBus,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        for facility in self.facilities.values_mut() {
            let (displaced, capabilities_changed) = facility.sync_equipment(catalog, now_ms);
            if capabilities_changed {
                changed.push(facility.id.clone());
            }
            for (machine_id, active) in displaced {
                if let Some(sub) = facility
                    .jobs
                    .get_mut(&active.job_id)
                    .and_then(|job| job.sub_operations.get_mut(active.operation_index))
                {
                    sub.state = SubOperationState::Queued;
                    sub.machine_id = None;
                    sub.started_at_ms = None;
                }
                self.log.add_assignment(
                    Assignment::new(
                        &active.operation_id,
                        &active.job_id,
                        &machine_id,
                        active.started_at_ms,
                        now_ms,
                    )
                    .with_index(active.operation_index)
                    .with_outcome(OperationOutcome::Interrupted),
                );
                warn!(
                    job_id = %active.job_id,
                    facility_id = %facility.id,
                    machine_id = %machine_id,
                    operation_index = active.operation_index,
                    "machine removed mid-run; operation requeued"
                );
                bus.publish(FabricationEvent::OperationInterrupted {
                    job_id: active.job_id.clone(),
                    facility_id: facility.id.clone(),
                    machine_id,
                    operation_index: active.operation_index,
                });
            }
        }
        changed
    }

    /// Completes every run that is due at `now_ms`.
    ///
    /// Returns the number of runs handled.
    pub fn advance(&mut self, now_ms: i64, bus: &mut EventBus) -> Result<usize> {
        let due: Vec<(String, String)> = self
            .facilities
            .values()
            .flat_map(|f| {
                f.machines
                    .values()
                    .filter(move |m| m.active.as_ref().is_some_and(|a| a.is_due(now_ms)))
                    .map(move |m| (f.id.clone(), m.id.clone()))
            })
            .collect();
        for (facility_id, machine_id) in &due {
            self.complete_run(facility_id, machine_id, now_ms, bus)?;
        }
        Ok(due.len())
    }

    fn complete_run(
        &mut self,
        facility_id: &str,
        machine_id: &str,
        now_ms: i64,
        bus: &mut EventBus,
    ) -> Result<()> {
        let Self {
            config,
            facilities,
            job_index,
            archived,
            callbacks,
            rng,
            log,
            ..
        } = self;
        let facility = facilities
            .get_mut(facility_id)
            .ok_or_else(|| FabricationError::FacilityNotFound(facility_id.into()))?;
        let machine = facility.machines.get_mut(machine_id);
        let Some(active) = machine.and_then(|m| m.finish(now_ms)) else {
            return Ok(());
        };
        bus.publish(FabricationEvent::MachineFreed {
            facility_id: facility_id.to_string(),
            machine_id: machine_id.to_string(),
        });

        let Some(mut job) = facility.jobs.remove(&active.job_id) else {
            return Ok(());
        };
        let index = active.operation_index;
        let Some(op) = job.operation(index).cloned() else {
            facility.jobs.insert(job.id.clone(), job);
            return Ok(());
        };

        let mut outcome = OperationOutcome::Succeeded;
        let mut terminal = None;
        if roll_failure(rng, op.failure_probability) {
            match op.failure_policy {
                FailurePolicy::Scrap => {
                    outcome = OperationOutcome::Scrapped;
                    terminal = Some(JobState::Failed);
                    job.last_reason = Some(format!("{} scrapped on {machine_id}", op.id));
                }
                FailurePolicy::Rework => {
                    let sub = &mut job.sub_operations[index];
                    sub.rework_count += 1;
                    let attempt = sub.rework_count;
                    if attempt > config.max_rework_attempts {
                        warn!(
                            job_id = %job.id,
                            operation_index = index,
                            attempts = attempt,
                            "rework limit reached; scrapping"
                        );
                        outcome = OperationOutcome::Scrapped;
                        terminal = Some(JobState::Failed);
                        job.last_reason = Some(format!(
                            "{} failed after {} rework attempts",
                            op.id, config.max_rework_attempts
                        ));
                    } else {
                        outcome = OperationOutcome::Reworked { attempt };
                    }
                }
                FailurePolicy::Downgrade => {
                    job.quality_multiplier *= config.downgrade_penalty;
                    outcome = OperationOutcome::Downgraded {
                        quality_multiplier: job.quality_multiplier,
                    };
                }
            }
        }

        if outcome.advanced() {
            let effect = match apply_operation(&mut job, index, &mut facility.inventory) {
                Ok(effect) => effect,
                Err(err) => {
                    facility.jobs.insert(job.id.clone(), job);
                    return Err(err);
                }
            };
            match effect {
                Effect::Applied => {}
                Effect::Skipped => outcome = OperationOutcome::Skipped,
                Effect::MissingInputs(reason) => {
                    warn!(
                        job_id = %job.id,
                        operation_index = index,
                        reason = %reason,
                        "inputs missing at completion; operation requeued"
                    );
                    job.last_reason = Some(reason);
                    outcome = OperationOutcome::Interrupted;
                }
            }
        }

        let sub = &mut job.sub_operations[index];
        match outcome {
            OperationOutcome::Succeeded
            | OperationOutcome::Downgraded { .. }
            | OperationOutcome::Skipped => {
                sub.state = SubOperationState::Completed;
                sub.completed_at_ms = Some(now_ms);
                sub.skipped = outcome == OperationOutcome::Skipped;
            }
            OperationOutcome::Reworked { .. } | OperationOutcome::Interrupted => {
                sub.state = SubOperationState::Queued;
                sub.machine_id = None;
                sub.started_at_ms = None;
            }
            OperationOutcome::Scrapped => sub.state = SubOperationState::Failed,
        }

        log.add_assignment(
            Assignment::new(&op.id, &job.id, machine_id, active.started_at_ms, now_ms)
                .with_index(index)
                .with_outcome(outcome),
        );
        debug!(
            job_id = %job.id,
            machine_id,
            operation_index = index,
            outcome = ?outcome,
            "operation finished"
        );
        bus.publish(FabricationEvent::OperationCompleted {
            job_id: job.id.clone(),
            facility_id: facility_id.to_string(),
            machine_id: machine_id.to_string(),
            operation_index: index,
            outcome,
        });

        match terminal.or_else(|| job.all_completed().then_some(JobState::Completed)) {
            Some(state) => {
                let job_id = job.id.clone();
                finish_job(facility, job, state, now_ms, callbacks, log, bus);
                job_index.remove(&job_id);
                archived.insert(job_id, facility_id.to_string());
            }
            None => {
                facility.jobs.insert(job.id.clone(), job);
            }
        }
        Ok(())
    }

    /// Starts a dispatched operation on its machine.
    ///
    /// Dynamic jobs pull their non-raw inputs from stock here.
    pub fn start_operation(
        &mut self,
        facility_id: &str,
        job_id: &str,
        machine_id: &str,
        index: usize,
        now_ms: i64,
        bus: &mut EventBus,
    ) -> Result<StartOutcome> {
        let Self {
            facilities,
            job_index,
            archived,
            callbacks,
            log,
            ..
        } = self;
        let facility = facilities
            .get_mut(facility_id)
            .ok_or_else(|| FabricationError::FacilityNotFound(facility_id.into()))?;
        let Some(mut job) = facility.jobs.remove(job_id) else {
            return Err(if archived.contains_key(job_id) {
                FabricationError::JobTerminal(job_id.to_string())
            } else {
                FabricationError::JobNotFound(job_id.to_string())
            });
        };

        let result = begin(facility, &mut job, machine_id, index, now_ms, log, bus);

        if matches!(result, Ok(StartOutcome::Skipped)) && job.all_completed() {
            let job_id = job.id.clone();
            finish_job(
                facility,
                job,
                JobState::Completed,
                now_ms,
                callbacks,
                log,
                bus,
            );
            job_index.remove(&job_id);
            archived.insert(job_id, facility_id.to_string());
        } else {
            facility.jobs.insert(job.id.clone(), job);
        }
        result
    }

    /// Finds later operations of dynamic jobs whose inputs are already at
    /// hand and pairs them with idle machines.
    ///
    /// Publishes one `JobStarted` per pairing.
    pub fn scan_opportunistic(
        &self,
        facility_id: &str,
        bus: &mut EventBus,
    ) -> Result<Vec<Dispatch>> {
        let facility = self.facility(facility_id)?;
        let mut idle: Vec<&MachineSlot> = facility.idle_machines();
        let mut dispatches = Vec::new();

        for job in facility.jobs.values() {
            if job.mode != ReservationMode::Dynamic || job.is_atomic() || job.state.is_terminal() {
                continue;
            }
            let pointer = job.operation_pointer();
            for index in pointer + 1..job.plan.operations.len() {
                if idle.is_empty() {
                    break;
                }
                if job.sub_operations[index].state != SubOperationState::Queued
                    || !inputs_free_for(job, index)
                {
                    continue;
                }
                let op = &job.plan.operations[index];
                let best = idle
                    .iter()
                    .enumerate()
                    .map(|(slot, m)| (slot, compatibility(&op.requirement, m)))
                    .filter(|(_, score)| *score > 0.0)
                    .max_by(|a, b| {
                        a.1.partial_cmp(&b.1)
                            .unwrap_or(Ordering::Equal)
                            .then_with(|| idle[b.0].id.cmp(&idle[a.0].id))
                    });
                let Some((slot, score)) = best else {
                    continue;
                };
                let machine = idle.remove(slot);

                debug!(
                    job_id = %job.id,
                    machine_id = %machine.id,
                    operation_index = index,
                    "opportunistic launch"
                );
                bus.publish(FabricationEvent::JobStarted {
                    job_id: job.id.clone(),
                    facility_id: facility_id.to_string(),
                    machine_id: machine.id.clone(),
                    operation_index: index,
                    estimated_duration_ms: op.duration_ms,
                });
                dispatches.push(Dispatch {
                    job_id: job.id.clone(),
                    facility_id: facility_id.to_string(),
                    machine_id: machine.id.clone(),
                    operation_index: index,
                    estimated_duration_ms: op.duration_ms,
                    compatibility: score,
                });
            }
        }
        Ok(dispatches)
    }
}

fn begin(
    facility: &mut Facility,
    job: &mut Job,
    machine_id: &str,
    index: usize,
    now_ms: i64,
    log: &mut Schedule,
    bus: &mut EventBus,
) -> Result<StartOutcome> {
    let Some(op) = job.operation(index).cloned() else {
        return Err(FabricationError::InvalidPlan(format!(
            "{} has no operation at index {index}",
            job.id
        )));
    };
    if job.sub_operations[index].state != SubOperationState::Queued {
        return Ok(StartOutcome::Deferred);
    }
    match facility.machines.get(machine_id) {
        None => return Ok(StartOutcome::Deferred),
        Some(machine) if !machine.is_idle() => {
            return Err(FabricationError::MachineBusy(machine_id.to_string()));
        }
        Some(machine) if !machine.satisfies(&op.requirement) => return Ok(StartOutcome::Deferred),
        Some(_) => {}
    }

    if job.mode == ReservationMode::Dynamic {
        pull_for_operation(job, index, &mut facility.inventory, |raw| !raw)?;
    }
    // Dynamic jobs may still lack raw inputs; those are pulled at completion.
    let blocked = shortfall(job, index, None)
        .iter()
        .any(|s| {
            job.mode == ReservationMode::Legacy || !job.is_raw(&s.item_id)
        });
    if blocked {
        if op.conditional {
            let sub = &mut job.sub_operations[index];
            sub.state = SubOperationState::Completed;
            sub.skipped = true;
            sub.completed_at_ms = Some(now_ms);
            log.add_assignment(
                Assignment::new(&op.id, &job.id, machine_id, now_ms, now_ms)
                    .with_index(index)
                    .with_outcome(OperationOutcome::Skipped),
            );
            debug!(
                job_id = %job.id,
                operation_index = index,
                "conditional operation skipped"
            );
            bus.publish(FabricationEvent::OperationCompleted {
                job_id: job.id.clone(),
                facility_id: facility.id.clone(),
                machine_id: machine_id.to_string(),
                operation_index: index,
                outcome: OperationOutcome::Skipped,
            });
            return Ok(StartOutcome::Skipped);
        }
        job.last_reason = describe_missing(job, index).map(|m| format!("{}: missing {m}", op.id));
        debug!(
            job_id = %job.id,
            operation_index = index,
            "start deferred; inputs gone"
        );
        return Ok(StartOutcome::Deferred);
    }

    let opportunistic = index != job.operation_pointer();
    let Some(machine) = facility.machines.get_mut(machine_id) else {
        return Ok(StartOutcome::Deferred);
    };
    machine.start(ActiveOperation {
        job_id: job.id.clone(),
        operation_index: index,
        operation_id: op.id.clone(),
        started_at_ms: now_ms,
        duration_ms: op.duration_ms,
    })?;

    let sub = &mut job.sub_operations[index];
    sub.state = SubOperationState::Running;
    sub.machine_id = Some(machine_id.to_string());
    sub.started_at_ms = Some(now_ms);
    sub.opportunistic = opportunistic;
    job.started_at_ms.get_or_insert(now_ms);
    debug!(
        job_id = %job.id,
        machine_id,
        operation_index = index,
        opportunistic,
        "operation started"
    );
    Ok(StartOutcome::Running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::events::EventKind;
    use crate::fixtures;
    use crate::models::{
        CapabilityRequirement, Inventory, ManufacturingPlan, MaterialSpec, Operation, OperationKind,
        Tier,
    };
    use crate::workspace::JobOrder;
    use std::collections::BTreeSet;

    const LATHE: &str = "F1/lathe_basic#1";

    fn shaping(id: &str, input: (&str, u32), output: (&str, u32)) -> Operation {
        let requirement = CapabilityRequirement::new("machining", 10.0);
        Operation::new(id, OperationKind::Shaping, requirement)
            .with_duration(1000)
            .consuming(MaterialSpec::new(input.0, input.1))
            .producing(MaterialSpec::new(output.0, output.1))
    }

    fn setup(plan: ManufacturingPlan, stock: Inventory) -> (WorkspaceManager, EventBus, String) {
        let config = SimulationConfig::default().without_default_failures();
        let mut ws = WorkspaceManager::new(&config);
        let mut facility = Facility::new("F1").with_inventory(stock);
        facility.install("lathe_basic");
        ws.add_facility(facility);
        let mut bus = EventBus::new();
        ws.sync_equipment(&fixtures::equipment(), 0, &mut bus);
        let order = JobOrder::new(plan, Tier::ShapedMaterial)
            .with_raw_items(BTreeSet::from(["steel_bar".to_string()]));
        let id = ws.create_job("F1", order, 0, &mut bus).unwrap();
        bus.drain_pending();
        (ws, bus, id)
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

    fn single_gear() -> ManufacturingPlan {
        ManufacturingPlan::new("gear", 1)
            .with_operation(shaping("OP-001", ("steel_bar", 2), ("gear", 1)))
    }

    #[test]
    fn test_run_to_completion() {
        let stock =
            Inventory::new().with_item(ItemInstance::new("steel_bar", 2).with_quality(80.0));
        let (mut ws, mut bus, id) = setup(single_gear(), stock);

        let started = start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        assert_eq!(started, StartOutcome::Running);
        assert_eq!(ws.advance(500, &mut bus).unwrap(), 0);
        assert_eq!(ws.advance(1000, &mut bus).unwrap(), 1);

        let job = ws.job(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.inventory.is_empty());
        assert_eq!(job.ledger.consumed.get("steel_bar"), Some(&2));

        let facility = ws.facility("F1").unwrap();
        assert_eq!(facility.inventory.quantity("gear"), 1);
        let gear = &facility.inventory.slot("gear").unwrap().stacks[0];
        assert!((gear.quality - 80.0).abs() < 1e-9);
        assert!(facility.machines[LATHE].is_idle());
        assert_eq!(ws.schedule().assignment_count(), 1);
    }

    #[test]
    fn test_busy_machine_rejected() {
        let plan = ManufacturingPlan::new("gear", 2)
            .with_operation(shaping("OP-001", ("steel_bar", 2), ("gear", 1)))
            .with_operation(shaping("OP-002", ("steel_bar", 2), ("gear", 1)));
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 4));
        let (mut ws, mut bus, id) = setup(plan, stock);

        start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        let err = start(&mut ws, &mut bus, &id, 1, 0).unwrap_err();
        assert_eq!(err, FabricationError::MachineBusy(LATHE.into()));
    }

    #[test]
    fn test_missing_inputs_defer_start() {
        let (mut ws, mut bus, id) = setup(single_gear(), Inventory::new());
        let outcome = start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        assert_eq!(outcome, StartOutcome::Deferred);
        assert!(ws.facility("F1").unwrap().machines[LATHE].is_idle());
        let reason = ws.job(&id).unwrap().last_reason.clone().unwrap();
        assert!(reason.contains("steel_bar"));
    }

    #[test]
    fn test_conditional_operation_skipped() {
        let wash = Operation::new(
            "OP-001",
            OperationKind::Treatment {
                condition: crate::models::Condition::Contaminated,
            },
            CapabilityRequirement::new("machining", 1.0),
        )
        .with_duration(1000)
        .consuming(MaterialSpec::new("gear", 1).with_tag("contaminated"))
        .producing(MaterialSpec::new("gear", 1))
        .conditional();
        let plan = ManufacturingPlan::new("gear", 1).with_operation(wash);
        let (mut ws, mut bus, id) = setup(plan, Inventory::new());

        let outcome = start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        assert_eq!(outcome, StartOutcome::Skipped);
        let job = ws.job(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.sub_operations[0].skipped);
    }

    #[test]
    fn test_scrap_fails_job_and_returns_unconsumed() {
        let doomed = shaping("OP-002", ("steel_bar", 2), ("gear", 1))
            .with_failure(1.0, FailurePolicy::Scrap);
        let plan = ManufacturingPlan::new("gear", 2)
            .with_operation(shaping("OP-001", ("steel_bar", 2), ("gear", 1)))
            .with_operation(doomed);
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 4));
        let (mut ws, mut bus, id) = setup(plan, stock);

        start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        ws.advance(1000, &mut bus).unwrap();
        start(&mut ws, &mut bus, &id, 1, 1000).unwrap();
        ws.advance(2000, &mut bus).unwrap();

        let job = ws.job(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.last_reason.as_deref().unwrap().contains("scrapped"));
        let facility = ws.facility("F1").unwrap();
        // OP-001's steel is gone; OP-002's steel and OP-001's gear come back.
        assert_eq!(facility.inventory.quantity("steel_bar"), 2);
        assert_eq!(facility.inventory.quantity("gear"), 1);
        assert!(ws.is_finished(&id));
    }

    #[test]
    fn test_rework_keeps_materials_then_escalates() {
        let flaky = shaping("OP-001", ("steel_bar", 2), ("gear", 1))
            .with_failure(1.0, FailurePolicy::Rework);
        let plan = ManufacturingPlan::new("gear", 1).with_operation(flaky);
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 2));
        let (mut ws, mut bus, id) = setup(plan, stock);

        let mut now = 0;
        for attempt in 1..=3 {
            start(&mut ws, &mut bus, &id, 0, now).unwrap();
            now += 1000;
            ws.advance(now, &mut bus).unwrap();
            let job = ws.job(&id).unwrap();
            assert_eq!(job.sub_operations[0].rework_count, attempt);
            assert_eq!(job.inventory.quantity("steel_bar"), 2);
        }
        start(&mut ws, &mut bus, &id, 0, now).unwrap();
        ws.advance(now + 1000, &mut bus).unwrap();
        assert_eq!(ws.job(&id).unwrap().state, JobState::Failed);
        assert_eq!(
            ws.schedule()
                .count_outcomes(|o| matches!(o, OperationOutcome::Reworked { .. })),
            3
        );
    }

    #[test]
    fn test_downgrade_lowers_final_quality() {
        let rough = shaping("OP-001", ("steel_bar", 2), ("gear", 1))
            .with_failure(1.0, FailurePolicy::Downgrade);
        let plan = ManufacturingPlan::new("gear", 1).with_operation(rough);
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 2));
        let (mut ws, mut bus, id) = setup(plan, stock);

        start(&mut ws, &mut bus, &id, 0, 0).unwrap();
        ws.advance(1000, &mut bus).unwrap();
        assert_eq!(ws.job(&id).unwrap().state, JobState::Completed);
        let facility = ws.facility("F1").unwrap();
        let gear = &facility.inventory.slot("gear").unwrap().stacks[0];
        assert!((gear.quality - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_uninstall_requeues_operation() {
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 2));
        let (mut ws, mut bus, id) = setup(single_gear(), stock);
        start(&mut ws, &mut bus, &id, 0, 0).unwrap();

        ws.facility_mut("F1").unwrap().uninstall(LATHE);
        let changed = ws.sync_equipment(&fixtures::equipment(), 400, &mut bus);
        assert_eq!(changed, vec!["F1".to_string()]);

        let job = ws.job(&id).unwrap();
        assert_eq!(job.sub_operations[0].state, SubOperationState::Queued);
        assert_eq!(job.inventory.quantity("steel_bar"), 2);
        let events = bus.drain_pending();
        assert!(events
            .iter()
            .any(|e| e.kind() == EventKind::OperationInterrupted));
    }

    #[test]
    fn test_opportunistic_scan() {
        // OP-002 only needs a gear that is already in the job.
        let plan = ManufacturingPlan::new("gearbox", 1)
            .with_operation(shaping("OP-001", ("steel_bar", 2), ("shaft", 1)))
            .with_operation(shaping("OP-002", ("gear", 1), ("gear_blank", 1)))
            .with_operation(
                Operation::new(
                    "OP-003",
                    OperationKind::Assembly,
                    CapabilityRequirement::new("machining", 10.0),
                )
                .consuming(MaterialSpec::new("shaft", 1))
                .consuming(MaterialSpec::new("gear_blank", 1))
                .producing(MaterialSpec::new("gearbox", 1)),
            );
        let config = SimulationConfig::default()
            .without_default_failures()
            .with_reservation_mode(ReservationMode::Dynamic);
        let mut ws = WorkspaceManager::new(&config);
        let stock = Inventory::new().with_item(ItemInstance::new("steel_bar", 2));
        let mut facility = Facility::new("F1").with_inventory(stock);
        facility.install("lathe_basic");
        facility.install("lathe_precision");
        ws.add_facility(facility);
        let mut bus = EventBus::new();
        ws.sync_equipment(&fixtures::equipment(), 0, &mut bus);
        let order = JobOrder::new(plan, Tier::Assembly)
            .with_raw_items(BTreeSet::from(["steel_bar".to_string()]))
            .with_inputs(vec![ItemInstance::new("gear", 1)]);
        let id = ws.create_job("F1", order, 0, &mut bus).unwrap();
        bus.drain_pending();

        let dispatches = ws.scan_opportunistic("F1", &mut bus).unwrap();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].operation_index, 1);
        assert_eq!(dispatches[0].machine_id, "F1/lathe_precision#2");

        let outcome = ws
            .start_operation("F1", &id, &dispatches[0].machine_id, 1, 0, &mut bus)
            .unwrap();
        assert_eq!(outcome, StartOutcome::Running);
        assert!(ws.job(&id).unwrap().sub_operations[1].opportunistic);
    }
}
