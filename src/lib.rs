//! Manufacturing job engine for the U-Engine ecosystem.
//!
//! Turns "build N units of item X" into a validated sequence of shaping,
//! assembly, disassembly and treatment operations, then runs those
//! operations as jobs against facilities with finite equipment and stock.
//!
//! # Modules
//!
//! - **`models`**: Domain types: `BaseItem`, `ItemInstance`, `Inventory`,
//!   `Operation`, `ManufacturingPlan`, `Job`, `MachineSlot`, `Schedule`
//! - **`analysis`**: Gap analysis over recipes and condition analysis of
//!   damaged inputs
//! - **`planning`**: `WorkflowGenerator`, plan synthesis from gaps
//! - **`validation`**: Plan integrity checks (duplicate IDs, unknown items,
//!   producer/consumer cycles)
//! - **`dispatching`**: Composable priority rules and the ready queue
//! - **`scheduler`**: Job state evaluation, machine assignment, KPIs
//! - **`workspace`**: Facilities, per-job inventories, execution and
//!   cancellation
//! - **`events`**: Typed synchronous event bus
//!
//! # Architecture
//!
//! Every service is owned by a [`Simulation`]; nothing is process-global.
//! Services talk through [`events::EventBus`]: the workspace reports
//! progress, the state manager re-evaluates jobs, the coordinator pairs
//! ready operations with idle machines. Time advances only through
//! [`Simulation::tick`].
//!
//! # References
//!
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems"
//! - Groover (2019), "Automation, Production Systems, and Computer-Integrated
//!   Manufacturing", Ch. 25-26

pub mod analysis;
pub mod config;
pub mod dispatching;
pub mod error;
pub mod events;
pub mod models;
pub mod planning;
pub mod scheduler;
pub mod validation;
pub mod workspace;

mod simulation;

pub use error::{FabricationError, Result};
pub use simulation::{Simulation, TickSummary};

#[cfg(test)]
mod fixtures;
