//! Condition and gap analysis.
//!
//! Analysis runs before any plan exists. It answers two questions: what do
//! the supplied input items yield once treated or torn down, and what is
//! still missing for the target after stock and recovery are counted.
//!
//! # Modules
//!
//! - **`condition`**: per-input conditions, treatments, recoveries, risks
//! - **`gap`**: recursive shortfall walk over the recipe hierarchy

mod condition;
mod gap;

pub use condition::{
    recovery_rate, ComponentRecovery, ConditionAnalysis, ConditionAnalyzer, RiskFactor, RiskImpact,
    RiskSeverity, TreatmentProfile, TreatmentStep,
};
pub use gap::{analyze_gaps, Gap, GapReport};

pub(crate) use gap::component_quantity;
