//! Evaluation context for priority rules.

/// Runtime state passed to priority rules.
///
/// All times are in milliseconds relative to the simulation epoch (t=0).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriorityContext {
    /// Current simulation time (ms).
    pub current_time_ms: i64,
}

impl PriorityContext {
    /// Creates a context at the given time.
    pub fn at_time(current_time_ms: i64) -> Self {
        Self { current_time_ms }
    }

    /// Hours elapsed since `since_ms` (never negative).
    pub fn hours_since(&self, since_ms: i64) -> f64 {
        (self.current_time_ms - since_ms).max(0) as f64 / 3_600_000.0
    }
}
