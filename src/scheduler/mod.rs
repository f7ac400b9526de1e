//! Job state tracking, machine assignment and KPI evaluation.
//!
//! # State
//!
//! `JobStateManager` evaluates each job against what its facility can
//! offer and keeps ready jobs in a priority-ordered queue.
//!
//! # Assignment
//!
//! `JobAssignmentCoordinator` pairs ready operations with idle machines
//! using a greedy priority-then-compatibility heuristic. It is not optimal,
//! but decides within a tick.
//!
//! # KPI
//!
//! `ProductionKpi` summarizes a run: makespan, utilization, flow time,
//! yield, rework and scrap.
//!
//! # References
//!
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems", Ch. 3-4
//! - Baker & Trietsch (2019), "Principles of Sequencing and Scheduling"

mod coordinator;
mod kpi;
mod state;

pub use coordinator::{compatibility, Dispatch, JobAssignmentCoordinator, ReadyOperation};
pub use kpi::ProductionKpi;
pub use state::{evaluate, JobEvaluation, JobStateManager, ReadinessSource};
