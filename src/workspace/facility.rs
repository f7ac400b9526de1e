//! Facilities: installed equipment, machine slots, stock and jobs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::materials::shortfall;
use crate::models::{
    ActiveOperation, Capability, CapabilityRequirement, EquipmentCatalog, Inventory, Job, JobState,
    MachineSlot,
};
use crate::scheduler::ReadinessSource;

/// One piece of equipment installed in a facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledEquipment {
    /// Unique within the facility; doubles as the machine slot id.
    pub installation_id: String,
    pub equipment_id: String,
}

/// A site with its own stock, machines and job queue.
///
/// Machine slots follow the installed equipment: they are derived when
/// equipment is synced in and dropped when it is removed. Storage-only
/// equipment never gets a slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facility {
    pub id: String,
    pub inventory: Inventory,
    pub installed: Vec<InstalledEquipment>,
    pub machines: BTreeMap<String, MachineSlot>,
    /// Active jobs keyed by id (creation order, ids are zero-padded).
    pub jobs: BTreeMap<String, Job>,
    pub completed: Vec<Job>,
    pub failed: Vec<Job>,
    pub cancelled: Vec<Job>,
    capabilities: Vec<Capability>,
    next_installation: u32,
}

impl Facility {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inventory: Inventory::new(),
            installed: Vec::new(),
            machines: BTreeMap::new(),
            jobs: BTreeMap::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            capabilities: Vec::new(),
            next_installation: 1,
        }
    }

    pub fn with_inventory(mut self, inventory: Inventory) -> Self {
        self.inventory = inventory;
        self
    }

    /// Records an installation. Takes effect on the next sync.
    pub fn install(&mut self, equipment_id: impl Into<String>) -> String {
        let equipment_id = equipment_id.into();
        let installation_id = format!("{}/{}#{}", self.id, equipment_id, self.next_installation);
        self.next_installation += 1;
        self.installed.push(InstalledEquipment {
            installation_id: installation_id.clone(),
            equipment_id,
        });
        installation_id
    }

    /// Removes an installation. Takes effect on the next sync.
    pub fn uninstall(&mut self, installation_id: &str) -> bool {
        let before = self.installed.len();
        self.installed
            .retain(|e| e.installation_id != installation_id);
        self.installed.len() != before
    }

    /// Brings machine slots and facility capabilities in line with the
    /// installed equipment.
    ///
    /// Returns operations displaced from removed machines and whether the
    /// capability set changed.
    pub fn sync_equipment(
        &mut self,
        catalog: &EquipmentCatalog,
        now_ms: i64,
    ) -> (Vec<(String, ActiveOperation)>, bool) {
        let mut displaced = Vec::new();
        let removed: Vec<String> = self
            .machines
            .keys()
            .filter(|id| {
                !self
                    .installed
                    .iter()
                    .any(|e| &e.installation_id == *id)
            })
            .cloned()
            .collect();
        for id in removed {
            if let Some(mut slot) = self.machines.remove(&id) {
                if let Some(active) = slot.interrupt(now_ms) {
                    displaced.push((id, active));
                }
            }
        }

        let mut capabilities = Vec::new();
        for installed in &self.installed {
            let Ok(definition) = catalog.get(&installed.equipment_id) else {
                continue;
            };
            if !self.machines.contains_key(&installed.installation_id) {
                let id = &installed.installation_id;
                if let Some(slot) = MachineSlot::from_equipment(id, definition) {
                    self.machines.insert(id.clone(), slot);
                }
            }
            let processes = definition.capabilities.iter().filter(|c| c.is_process());
            capabilities.extend(processes.cloned());
        }

        let changed = capabilities != self.capabilities;
        self.capabilities = capabilities;
        (displaced, changed)
    }

    /// Process capabilities of all installed equipment, as of the last sync.
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Whether some machine meets `requirement`.
    pub fn has_capability(&self, requirement: &CapabilityRequirement) -> bool {
        requirement.satisfied_by(&self.capabilities)
    }

    /// Machines without an operation, by id.
    pub fn idle_machines(&self) -> Vec<&MachineSlot> {
        self.machines.values().filter(|m| m.is_idle()).collect()
    }

    /// Earliest estimated completion among busy machines.
    pub fn next_completion_ms(&self) -> Option<i64> {
        self.machines
            .values()
            .filter_map(|m| m.active.as_ref())
            .map(|a| a.estimated_completion_ms())
            .min()
    }

    /// Active job by id.
    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    /// Active job ids in creation order.
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Finished job by id.
    pub fn archived_job(&self, job_id: &str) -> Option<&Job> {
        self.completed
            .iter()
            .chain(&self.failed)
            .chain(&self.cancelled)
            .find(|j| j.id == job_id)
    }

    /// Every finished job.
    pub fn archived_jobs(&self) -> impl Iterator<Item = &Job> {
        self.completed
            .iter()
            .chain(&self.failed)
            .chain(&self.cancelled)
    }

    /// Files a terminal job under its state.
    pub(crate) fn archive(&mut self, job: Job) {
        match job.state {
            JobState::Completed => self.completed.push(job),
            JobState::Cancelled => self.cancelled.push(job),
            _ => self.failed.push(job),
        }
    }

    /// Read-only view used for readiness checks.
    pub fn view(&self) -> FacilityView<'_> {
        FacilityView {
            inventory: &self.inventory,
            capabilities: &self.capabilities,
        }
    }

    /// A job together with a view over the rest of the facility.
    pub fn split_job(&mut self, job_id: &str) -> Option<(&mut Job, FacilityView<'_>)> {
        let view = FacilityView {
            inventory: &self.inventory,
            capabilities: &self.capabilities,
        };
        let job = self.jobs.get_mut(job_id)?;
        Some((job, view))
    }
}

/// Answers readiness questions from a facility's stock and equipment.
#[derive(Debug, Clone, Copy)]
pub struct FacilityView<'a> {
    inventory: &'a Inventory,
    capabilities: &'a [Capability],
}

impl ReadinessSource for FacilityView<'_> {
    fn materials_ready(&self, job: &Job, index: usize) -> bool {
        let Some(op) = job.operation(index) else {
            return false;
        };
        // Absent inputs make a conditional step a skip, not a block.
        op.conditional || shortfall(job, index, Some(self.inventory)).is_empty()
    }

    fn equipment_available(&self, requirement: &CapabilityRequirement) -> bool {
        requirement.satisfied_by(self.capabilities)
    }
}
