//! Typed synchronous event bus.
//!
//! Components never call each other directly for progress notifications;
//! they publish [`FabricationEvent`]s. Delivery is synchronous: every
//! matching subscriber runs inside [`EventBus::publish`]. Each event is
//! also queued in a pending mailbox that the owning simulation drains to
//! route work between its services.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::models::{JobState, OperationOutcome};

/// Events exchanged between the engine's services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FabricationEvent {
    /// A job was accepted into a facility.
    JobCreated { job_id: String, facility_id: String },
    /// A job's evaluated state or ready flag changed.
    JobStateChanged {
        job_id: String,
        facility_id: String,
        state: JobState,
        ready: bool,
    },
    /// The coordinator matched a ready operation to an idle machine.
    JobStarted {
        job_id: String,
        facility_id: String,
        machine_id: String,
        operation_index: usize,
        estimated_duration_ms: i64,
    },
    /// A machine run ended.
    OperationCompleted {
        job_id: String,
        facility_id: String,
        machine_id: String,
        operation_index: usize,
        outcome: OperationOutcome,
    },
    /// A machine was removed mid-run; the operation was requeued.
    OperationInterrupted {
        job_id: String,
        facility_id: String,
        machine_id: String,
        operation_index: usize,
    },
    /// A machine became idle.
    MachineFreed { facility_id: String, machine_id: String },
    /// Stock was added to a facility from outside.
    MaterialsArrived {
        facility_id: String,
        item_ids: Vec<String>,
    },
    /// A job reached a terminal state.
    JobFinished {
        job_id: String,
        facility_id: String,
        state: JobState,
    },
}

/// Discriminant used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    JobCreated,
    JobStateChanged,
    JobStarted,
    OperationCompleted,
    OperationInterrupted,
    MachineFreed,
    MaterialsArrived,
    JobFinished,
}

impl FabricationEvent {
    /// Event discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            FabricationEvent::JobCreated { .. } => EventKind::JobCreated,
            FabricationEvent::JobStateChanged { .. } => EventKind::JobStateChanged,
            FabricationEvent::JobStarted { .. } => EventKind::JobStarted,
            FabricationEvent::OperationCompleted { .. } => EventKind::OperationCompleted,
            FabricationEvent::OperationInterrupted { .. } => EventKind::OperationInterrupted,
            FabricationEvent::MachineFreed { .. } => EventKind::MachineFreed,
            FabricationEvent::MaterialsArrived { .. } => EventKind::MaterialsArrived,
            FabricationEvent::JobFinished { .. } => EventKind::JobFinished,
        }
    }

    /// Facility the event belongs to.
    pub fn facility_id(&self) -> &str {
        match self {
            FabricationEvent::JobCreated { facility_id, .. }
            | FabricationEvent::JobStateChanged { facility_id, .. }
            | FabricationEvent::JobStarted { facility_id, .. }
            | FabricationEvent::OperationCompleted { facility_id, .. }
            | FabricationEvent::OperationInterrupted { facility_id, .. }
            | FabricationEvent::MachineFreed { facility_id, .. }
            | FabricationEvent::MaterialsArrived { facility_id, .. }
            | FabricationEvent::JobFinished { facility_id, .. } => facility_id,
        }
    }

    /// Job the event is about, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            FabricationEvent::JobCreated { job_id, .. }
            | FabricationEvent::JobStateChanged { job_id, .. }
            | FabricationEvent::JobStarted { job_id, .. }
            | FabricationEvent::OperationCompleted { job_id, .. }
            | FabricationEvent::OperationInterrupted { job_id, .. }
            | FabricationEvent::JobFinished { job_id, .. } => Some(job_id),
            FabricationEvent::MachineFreed { .. }
            | FabricationEvent::MaterialsArrived { .. } => None,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&FabricationEvent)>;

struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventKind>,
    handler: Handler,
}

/// Routes events to subscribers and keeps them for the owner to drain.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    pending: VecDeque<FabricationEvent>,
    next_id: u64,
    published: u64,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to one event kind.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&FabricationEvent) + 'static,
    {
        self.add(Some(kind), Box::new(handler))
    }

    /// Subscribes to every event.
    pub fn subscribe_all<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&FabricationEvent) + 'static,
    {
        self.add(None, Box::new(handler))
    }

    fn add(&mut self, filter: Option<EventKind>, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.push(Subscriber { id, filter, handler });
        id
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Delivers an event to matching subscribers and queues it.
    pub fn publish(&mut self, event: FabricationEvent) {
        let kind = event.kind();
        for subscriber in self.subscribers.iter_mut() {
            if subscriber.filter.map_or(true, |k| k == kind) {
                (subscriber.handler)(&event);
            }
        }
        self.published += 1;
        self.pending.push_back(event);
    }

    /// Takes the oldest undrained event.
    pub fn next_pending(&mut self) -> Option<FabricationEvent> {
        self.pending.pop_front()
    }

    /// Takes every undrained event.
    pub fn drain_pending(&mut self) -> Vec<FabricationEvent> {
        self.pending.drain(..).collect()
    }

    /// Number of undrained events.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total events published.
    pub fn published_count(&self) -> u64 {
        self.published
    }

    /// Number of subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "subscribers",
                &self
                    .subscribers
                    .iter()
                    .map(|s| (s.id, s.filter))
                    .collect::<Vec<_>>(),
            )
            .field("pending", &self.pending.len())
            .field("published", &self.published)
            .finish()
    }
}
