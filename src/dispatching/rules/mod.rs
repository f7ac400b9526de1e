//! Built-in priority rules.
//!
//! # Categories
//!
//! - **Value**: TIER
//! - **Urgency**: RUSH, PRIORITY
//! - **Fairness**: AGE
//!
//! # Score Convention
//! All rules return higher scores for more urgent jobs.

use super::{PriorityContext, PriorityInput, PriorityRule, RuleScore};
use crate::config::PriorityConfig;
use crate::models::Tier;

// ======================== Value rules ========================

/// Tier base value.
///
/// Jobs building higher-tier targets carry more value and are served first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierValue {
    pub raw: f64,
    pub shaped: f64,
    pub assembly: f64,
}

impl Default for TierValue {
    fn default() -> Self {
        Self::from_config(&PriorityConfig::default())
    }
}

impl TierValue {
    /// Reads the tier values from configuration.
    pub fn from_config(config: &PriorityConfig) -> Self {
        Self {
            raw: config.tier_value(Tier::RawMaterial),
            shaped: config.tier_value(Tier::ShapedMaterial),
            assembly: config.tier_value(Tier::Assembly),
        }
    }
}

impl PriorityRule for TierValue {
    fn name(&self) -> &'static str {
        "TIER"
    }

    fn evaluate(&self, input: &PriorityInput, _context: &PriorityContext) -> RuleScore {
        match input.tier {
            Tier::RawMaterial => self.raw,
            Tier::ShapedMaterial => self.shaped,
            Tier::Assembly => self.assembly,
        }
    }

    fn description(&self) -> &'static str {
        "Tier Base Value"
    }
}

// ======================== Urgency rules ========================

/// Flat bonus for rush jobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RushBonus(pub f64);

impl Default for RushBonus {
    fn default() -> Self {
        Self(PriorityConfig::default().rush_bonus)
    }
}

impl PriorityRule for RushBonus {
    fn name(&self) -> &'static str {
        "RUSH"
    }

    fn evaluate(&self, input: &PriorityInput, _context: &PriorityContext) -> RuleScore {
        if input.rush {
            self.0
        } else {
            0.0
        }
    }

    fn description(&self) -> &'static str {
        "Rush Bonus"
    }
}

/// Caller-assigned priority.
#[derive(Debug, Clone, Copy)]
pub struct ManualPriority;

impl PriorityRule for ManualPriority {
    fn name(&self) -> &'static str {
        "PRIORITY"
    }

    fn evaluate(&self, input: &PriorityInput, _context: &PriorityContext) -> RuleScore {
        input.manual_priority as f64
    }

    fn description(&self) -> &'static str {
        "Manual Priority"
    }
}

// ======================== Fairness rules ========================

/// Age in hours.
///
/// Grows without bound, so a waiting job eventually outranks newer ones of
/// the same tier. Provides bounded wait, not a starvation guarantee.
#[derive(Debug, Clone, Copy)]
pub struct AgeHours;

impl PriorityRule for AgeHours {
    fn name(&self) -> &'static str {
        "AGE"
    }

    fn evaluate(&self, input: &PriorityInput, context: &PriorityContext) -> RuleScore {
        context.hours_since(input.created_at_ms)
    }

    fn description(&self) -> &'static str {
        "Age In Hours"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_value() {
        let ctx = PriorityContext::at_time(0);
        let rule = TierValue::default();
        let value = |tier| rule.evaluate(&PriorityInput::new("a", tier), &ctx);
        assert_eq!(value(Tier::RawMaterial), 10.0);
        assert_eq!(value(Tier::ShapedMaterial), 25.0);
        assert_eq!(value(Tier::Assembly), 50.0);
    }

    #[test]
    fn test_rush_bonus() {
        let ctx = PriorityContext::at_time(0);
        let rush = PriorityInput::new("a", Tier::Assembly).with_rush(true);
        let normal = PriorityInput::new("b", Tier::Assembly);
        assert_eq!(RushBonus::default().evaluate(&rush, &ctx), 50.0);
        assert_eq!(RushBonus(10.0).evaluate(&normal, &ctx), 0.0);
    }

    #[test]
    fn test_age_hours() {
        let ctx = PriorityContext::at_time(3 * 3_600_000);
        let old = PriorityInput::new("old", Tier::RawMaterial).created_at(0);
        let new = PriorityInput::new("new", Tier::RawMaterial).created_at(3 * 3_600_000);
        assert!((AgeHours.evaluate(&old, &ctx) - 3.0).abs() < 1e-12);
        assert_eq!(AgeHours.evaluate(&new, &ctx), 0.0);
    }

    #[test]
    fn test_manual_priority() {
        let ctx = PriorityContext::at_time(0);
        let high = PriorityInput::new("high", Tier::RawMaterial).with_manual_priority(100);
        let low = PriorityInput::new("low", Tier::RawMaterial).with_manual_priority(1);
        let score = |input: &PriorityInput| ManualPriority.evaluate(input, &ctx);
        assert!(score(&high) > score(&low));
    }
}
