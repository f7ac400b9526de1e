//! Manufacturing domain models.
//!
//! Provides the data types the planner, scheduler and workspace share:
//! catalog definitions, owned item instances, inventories, operations,
//! plans, jobs, machine slots and the execution log.
//!
//! # Domain Mappings
//!
//! | u-fabricate | Scheduling term | Shop floor |
//! |-------------|-----------------|------------|
//! | ManufacturingPlan | Task template | Routing |
//! | Operation | Activity | Work step |
//! | Job | Task | Work order |
//! | MachineSlot | Resource | Workstation |
//! | Schedule | Solution | Production log |

mod equipment;
mod inventory;
mod item;
mod job;
mod machine;
mod operation;
mod plan;
mod schedule;

pub use equipment::{
    Capability, CapabilityKind, CapabilityRequirement, CapabilityValue, EquipmentCatalog,
    EquipmentDefinition,
};
pub use inventory::{Inventory, InventorySlot, Pool};
pub use item::{
    BaseItem, Condition, ItemCatalog, ItemFilter, ItemInstance, RecipeComponent, Tier, SALVAGED_TAG,
};
pub use job::{Job, JobState, MaterialLedger, ReservationMode, SubOperation, SubOperationState};
pub use machine::{ActiveOperation, MachineSlot};
pub use operation::{FailurePolicy, LaborClass, MaterialSpec, Operation, OperationKind};
pub use plan::ManufacturingPlan;
pub use schedule::{Assignment, OperationOutcome, Schedule};
