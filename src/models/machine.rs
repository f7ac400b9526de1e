//! Machine slots.
//!
//! A machine slot is one schedulable unit derived from installed equipment.
//! It holds at most one in-flight operation and tracks its progress in
//! simulated time.

use serde::{Deserialize, Serialize};

use super::{Capability, CapabilityRequirement, EquipmentDefinition};
use crate::error::{FabricationError, Result};

/// An operation running on a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveOperation {
    /// Owning job.
    pub job_id: String,
    /// Index into the job's plan.
    pub operation_index: usize,
    /// Plan operation id.
    pub operation_id: String,
    /// Start time (ms).
    pub started_at_ms: i64,
    /// Expected duration (ms).
    pub duration_ms: i64,
}

impl ActiveOperation {
    /// Estimated completion time (ms).
    pub fn estimated_completion_ms(&self) -> i64 {
        self.started_at_ms + self.duration_ms
    }

    /// Whether the operation has run its full duration at `now_ms`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        now_ms - self.started_at_ms >= self.duration_ms
    }

    /// Fraction complete at `now_ms` (0..=1).
    pub fn progress(&self, now_ms: i64) -> f64 {
        if self.duration_ms <= 0 {
            return 1.0;
        }
        ((now_ms - self.started_at_ms) as f64 / self.duration_ms as f64).clamp(0.0, 1.0)
    }
}

/// One schedulable unit in a facility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSlot {
    /// Slot id (installation id).
    pub id: String,
    /// Equipment definition id.
    pub equipment_id: String,
    /// Display name.
    pub name: String,
    /// Process capabilities.
    pub capabilities: Vec<Capability>,
    /// In-flight operation.
    pub active: Option<ActiveOperation>,
    /// Accumulated busy time (ms).
    pub busy_ms: i64,
    /// Operations finished on this slot.
    pub completed_operations: u32,
}

impl MachineSlot {
    /// Derives a slot from equipment.
    ///
    /// Returns `None` when the equipment exposes no process capability.
    pub fn from_equipment(id: impl Into<String>, definition: &EquipmentDefinition) -> Option<Self> {
        if !definition.is_processing() {
            return None;
        }
        Some(Self {
            id: id.into(),
            equipment_id: definition.id.clone(),
            name: definition.name.clone(),
            capabilities: definition
                .capabilities
                .iter()
                .filter(|c| c.is_process())
                .cloned()
                .collect(),
            active: None,
            busy_ms: 0,
            completed_operations: 0,
        })
    }

    /// Whether no operation is running.
    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Whether this machine meets `requirement`.
    pub fn satisfies(&self, requirement: &CapabilityRequirement) -> bool {
        requirement.satisfied_by(&self.capabilities)
    }

    /// Best level offered for `category`.
    pub fn capability_level(&self, category: &str) -> Option<f64> {
        self.capabilities
            .iter()
            .filter(|c| c.category == category)
            .map(|c| c.value.as_level())
            .fold(None, |best, v| Some(best.map_or(v, |b: f64| b.max(v))))
    }

    /// Occupies the slot.
    pub fn start(&mut self, operation: ActiveOperation) -> Result<()> {
        if self.active.is_some() {
            return Err(FabricationError::MachineBusy(self.id.clone()));
        }
        self.active = Some(operation);
        Ok(())
    }

    /// Frees the slot, returning the finished operation.
    ///
    /// Busy time is credited up to `now_ms`.
    pub fn finish(&mut self, now_ms: i64) -> Option<ActiveOperation> {
        let op = self.active.take()?;
        self.busy_ms += (now_ms - op.started_at_ms).max(0);
        self.completed_operations += 1;
        Some(op)
    }

    /// Frees the slot without counting a completed operation.
    pub fn interrupt(&mut self, now_ms: i64) -> Option<ActiveOperation> {
        let op = self.active.take()?;
        self.busy_ms += (now_ms - op.started_at_ms).max(0);
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lathe() -> EquipmentDefinition {
        EquipmentDefinition::new("lathe")
            .with_name("Lathe")
            .with_capability(Capability::level("machining", 20.0))
            .with_capability(Capability::storage("tool_rack", 5.0))
    }

    fn active(start: i64, duration: i64) -> ActiveOperation {
        ActiveOperation {
            job_id: "JOB-1".into(),
            operation_index: 0,
            operation_id: "OP-001".into(),
            started_at_ms: start,
            duration_ms: duration,
        }
    }

    #[test]
    fn test_from_equipment() {
        let slot = MachineSlot::from_equipment("F1/lathe#1", &lathe()).unwrap();
        assert_eq!(slot.equipment_id, "lathe");
        assert_eq!(slot.capabilities.len(), 1);
        assert!(slot.is_idle());
        assert_eq!(slot.capability_level("machining"), Some(20.0));
        assert_eq!(slot.capability_level("welding"), None);
    }

    #[test]
    fn test_storage_only_has_no_slot() {
        let shelf = EquipmentDefinition::new("shelf")
            .with_capability(Capability::storage("storage", 50.0));
        assert!(MachineSlot::from_equipment("F1/shelf#1", &shelf).is_none());
    }

    #[test]
    fn test_single_occupancy() {
        let mut slot = MachineSlot::from_equipment("M1", &lathe()).unwrap();
        slot.start(active(0, 1000)).unwrap();
        assert!(!slot.is_idle());
        assert_eq!(
            slot.start(active(0, 1000)),
            Err(FabricationError::MachineBusy("M1".into()))
        );

        let done = slot.finish(1000).unwrap();
        assert_eq!(done.operation_id, "OP-001");
        assert!(slot.is_idle());
        assert_eq!(slot.busy_ms, 1000);
        assert_eq!(slot.completed_operations, 1);
        assert!(slot.finish(2000).is_none());
    }

    #[test]
    fn test_progress() {
        let op = active(1000, 4000);
        assert_eq!(op.estimated_completion_ms(), 5000);
        assert!(!op.is_due(4999));
        assert!(op.is_due(5000));
        assert!((op.progress(3000) - 0.5).abs() < 1e-10);
        assert_eq!(op.progress(9000), 1.0);
        assert_eq!(active(0, 0).progress(0), 1.0);
    }

    #[test]
    fn test_interrupt_keeps_count() {
        let mut slot = MachineSlot::from_equipment("M1", &lathe()).unwrap();
        slot.start(active(0, 1000)).unwrap();
        assert!(slot.interrupt(400).is_some());
        assert_eq!(slot.completed_operations, 0);
        assert_eq!(slot.busy_ms, 400);
    }
}
