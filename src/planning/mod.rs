//! Plan synthesis.
//!
//! [`WorkflowGenerator`] expands a request (target, quantity, damaged
//! inputs) into a validated [`ManufacturingPlan`](crate::models::ManufacturingPlan).

mod generator;

pub use generator::{GeneratedPlan, PlanRequest, WorkflowGenerator};
