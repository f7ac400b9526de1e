//! Job model.
//!
//! A job is a plan bound to a facility. It owns a private inventory that no
//! other job touches, tracks one [`SubOperation`] per plan operation, and
//! keeps a ledger of every unit moved in, consumed, produced and recovered.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{Inventory, ItemInstance, ManufacturingPlan, Operation, Tier};

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Atomic job whose only operation can start.
    ReadyToStart,
    BlockedByDependencies,
    BlockedByMaterials,
    BlockedByEquipment,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether the state is one of the blocked states.
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            JobState::BlockedByDependencies
                | JobState::BlockedByMaterials
                | JobState::BlockedByEquipment
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::ReadyToStart => "READY_TO_START",
            JobState::BlockedByDependencies => "BLOCKED_BY_DEPENDENCIES",
            JobState::BlockedByMaterials => "BLOCKED_BY_MATERIALS",
            JobState::BlockedByEquipment => "BLOCKED_BY_EQUIPMENT",
            JobState::InProgress => "IN_PROGRESS",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// How a job reserves facility stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReservationMode {
    /// Move every external input into the job at creation.
    #[default]
    Legacy,
    /// Move raw materials at creation; pull the rest when needed.
    Dynamic,
}

/// State of one plan operation inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubOperationState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Per-operation progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOperation {
    /// Index into the plan.
    pub index: usize,
    /// Current state.
    pub state: SubOperationState,
    /// Machine running it, if any.
    pub machine_id: Option<String>,
    /// Last start time (ms).
    pub started_at_ms: Option<i64>,
    /// Completion time (ms).
    pub completed_at_ms: Option<i64>,
    /// Rework attempts so far.
    pub rework_count: u32,
    /// Launched ahead of its index by the parallelism scan.
    pub opportunistic: bool,
    /// Completed without running because its inputs were gone.
    pub skipped: bool,
}

impl SubOperation {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: SubOperationState::Queued,
            machine_id: None,
            started_at_ms: None,
            completed_at_ms: None,
            rework_count: 0,
            opportunistic: false,
            skipped: false,
        }
    }
}

/// Units moved through a job, per item id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialLedger {
    /// Moved into the local inventory (reservations, pulls, supplied inputs).
    pub reserved: BTreeMap<String, u32>,
    /// Destroyed by completed operations.
    pub consumed: BTreeMap<String, u32>,
    /// Created by completed operations.
    pub produced: BTreeMap<String, u32>,
    /// Returned to the facility at the terminal transition (recovery).
    pub recovered: BTreeMap<String, u32>,
}

impl MaterialLedger {
    fn add(map: &mut BTreeMap<String, u32>, items: &[ItemInstance]) {
        for item in items {
            *map.entry(item.item_id.clone()).or_insert(0) += item.quantity;
        }
    }

    /// Records units moved in.
    pub fn record_reserved(&mut self, items: &[ItemInstance]) {
        Self::add(&mut self.reserved, items);
    }

    /// Records units consumed.
    pub fn record_consumed(&mut self, items: &[ItemInstance]) {
        Self::add(&mut self.consumed, items);
    }

    /// Records units produced.
    pub fn record_produced(&mut self, items: &[ItemInstance]) {
        Self::add(&mut self.produced, items);
    }

    /// Records units returned.
    pub fn record_recovered(&mut self, items: &[ItemInstance]) {
        Self::add(&mut self.recovered, items);
    }

    fn get(map: &BTreeMap<String, u32>, item_id: &str) -> u32 {
        map.get(item_id).copied().unwrap_or(0)
    }

    /// Units of `item_id` that should currently sit in the local inventory.
    pub fn balance(&self, item_id: &str) -> i64 {
        Self::get(&self.reserved, item_id) as i64 + Self::get(&self.produced, item_id) as i64
            - Self::get(&self.consumed, item_id) as i64
            - Self::get(&self.recovered, item_id) as i64
    }
}

/// A plan instantiation bound to a facility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id.
    pub id: String,
    /// Owning facility.
    pub facility_id: String,
    /// Plan being executed.
    pub plan: ManufacturingPlan,
    /// Tier of the target (drives priority).
    pub target_tier: Tier,
    /// Private inventory.
    pub inventory: Inventory,
    /// Current state.
    pub state: JobState,
    /// Whether ready work is available (last evaluation).
    pub ready: bool,
    /// Indices ready for assignment (last evaluation).
    pub ready_operations: Vec<usize>,
    /// Per-operation progress.
    pub sub_operations: Vec<SubOperation>,
    /// Caller-assigned priority.
    pub priority: i32,
    /// Rush flag.
    pub rush: bool,
    /// Reservation mode.
    pub mode: ReservationMode,
    /// Raw-tier item ids used by the plan.
    pub raw_items: BTreeSet<String>,
    /// Creation time (ms).
    pub created_at_ms: i64,
    /// First operation start (ms).
    pub started_at_ms: Option<i64>,
    /// Terminal transition time (ms).
    pub finished_at_ms: Option<i64>,
    /// Material flow record.
    pub ledger: MaterialLedger,
    /// Accumulated downgrade multiplier.
    pub quality_multiplier: f64,
    /// Last blocking or failure reason.
    pub last_reason: Option<String>,
}

impl Job {
    /// Creates a job with every operation queued.
    pub fn new(
        id: impl Into<String>,
        facility_id: impl Into<String>,
        plan: ManufacturingPlan,
        target_tier: Tier,
        created_at_ms: i64,
    ) -> Self {
        let sub_operations = (0..plan.operations.len()).map(SubOperation::new).collect();
        Self {
            id: id.into(),
            facility_id: facility_id.into(),
            plan,
            target_tier,
            inventory: Inventory::new(),
            state: JobState::BlockedByDependencies,
            ready: false,
            ready_operations: Vec::new(),
            sub_operations,
            priority: 0,
            rush: false,
            mode: ReservationMode::Legacy,
            raw_items: BTreeSet::new(),
            created_at_ms,
            started_at_ms: None,
            finished_at_ms: None,
            ledger: MaterialLedger::default(),
            quality_multiplier: 1.0,
            last_reason: None,
        }
    }

    /// Sets the caller priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the rush flag.
    pub fn with_rush(mut self, rush: bool) -> Self {
        self.rush = rush;
        self
    }

    /// Sets the reservation mode.
    pub fn with_mode(mut self, mode: ReservationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether the plan has a single operation.
    pub fn is_atomic(&self) -> bool {
        self.plan.is_atomic()
    }

    /// Operation at `index`.
    pub fn operation(&self, index: usize) -> Option<&Operation> {
        self.plan.operations.get(index)
    }

    /// Lowest index not yet completed (`len` when all are).
    pub fn operation_pointer(&self) -> usize {
        self.sub_operations
            .iter()
            .position(|s| s.state != SubOperationState::Completed)
            .unwrap_or(self.sub_operations.len())
    }

    /// Whether every operation before `index` is completed.
    pub fn predecessors_complete(&self, index: usize) -> bool {
        self.sub_operations[..index.min(self.sub_operations.len())]
            .iter()
            .all(|s| s.state == SubOperationState::Completed)
    }

    /// Whether every operation is completed.
    pub fn all_completed(&self) -> bool {
        self.sub_operations
            .iter()
            .all(|s| s.state == SubOperationState::Completed)
    }

    /// Number of completed operations.
    pub fn completed_operations(&self) -> usize {
        self.sub_operations
            .iter()
            .filter(|s| s.state == SubOperationState::Completed)
            .count()
    }

    /// Indices currently running.
    pub fn running_operations(&self) -> Vec<usize> {
        self.sub_operations
            .iter()
            .filter(|s| s.state == SubOperationState::Running)
            .map(|s| s.index)
            .collect()
    }

    /// Whether `item_id` is a raw material for this job.
    pub fn is_raw(&self, item_id: &str) -> bool {
        self.raw_items.contains(item_id)
    }

    /// Time since creation, or until the terminal transition (ms).
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        self.finished_at_ms.unwrap_or(now_ms) - self.created_at_ms
    }
}
