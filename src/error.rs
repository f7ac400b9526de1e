//! Error types.
//!
//! Definition errors (unknown ids, unbuildable recipes, invalid plans) fail
//! synchronously. Material and equipment shortfalls are not errors: they
//! surface as blocked job states and are retried on the next relevant event.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FabricationError>;

/// Errors raised by planning, job creation and workspace operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FabricationError {
    #[error("unknown item: {0}")]
    UnknownItem(String),

    #[error("unknown equipment: {0}")]
    UnknownEquipment(String),

    #[error("item '{0}' has no recipe and cannot be manufactured")]
    NotManufacturable(String),

    #[error("recipe cycle detected at '{0}'")]
    RecipeCycle(String),

    #[error("invalid quantity {quantity} for '{item_id}'")]
    InvalidQuantity { item_id: String, quantity: u32 },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("facility not found: {0}")]
    FacilityNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {0} has already finished")]
    JobTerminal(String),

    #[error("machine {0} already holds an operation")]
    MachineBusy(String),

    #[error("tick time {requested}ms is earlier than current time {current}ms")]
    TimeRegression { current: i64, requested: i64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Inventory accounting errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("insufficient '{item_id}': requested {requested}, obtainable {available}")]
    Insufficient {
        item_id: String,
        requested: u32,
        available: u32,
    },

    #[error("cannot release {requested} of '{item_id}': only {reserved} reserved")]
    ReleaseExceedsReserved {
        item_id: String,
        requested: u32,
        reserved: u32,
    },
}
