//! Weighted priority engine.
//!
//! Sums weighted rule scores. Ties are broken by job ID so orderings are
//! deterministic.
//!
//! # Reference
//! Haupt (1989), "A Survey of Priority Rule-Based Scheduling"

use std::cmp::Ordering;
use std::sync::Arc;

use super::rules::{AgeHours, RushBonus, TierValue};
use super::{PriorityContext, PriorityInput, PriorityRule, RuleScore};
use crate::config::PriorityConfig;

#[derive(Clone)]
struct WeightedRule {
    rule: Arc<dyn PriorityRule>,
    weight: f64,
}

/// A composable engine for job prioritization.
///
/// # Example
/// ```
/// use u_fabricate::dispatching::PriorityEngine;
/// use u_fabricate::dispatching::rules;
///
/// let engine = PriorityEngine::new()
///     .with_rule(rules::TierValue::default())
///     .with_weighted_rule(rules::ManualPriority, 0.5);
/// assert_eq!(engine.rule_count(), 2);
/// ```
#[derive(Clone)]
pub struct PriorityEngine {
    rules: Vec<WeightedRule>,
    epsilon: f64,
}

impl PriorityEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            epsilon: 1e-9,
        }
    }

    /// Tier value + rush bonus + age in hours, with default values.
    pub fn standard() -> Self {
        Self::from_config(&PriorityConfig::default())
    }

    /// Tier value + rush bonus + age in hours, with configured values.
    pub fn from_config(config: &PriorityConfig) -> Self {
        Self::new()
            .with_rule(TierValue::from_config(config))
            .with_rule(RushBonus(config.rush_bonus))
            .with_rule(AgeHours)
    }

    /// Adds a rule (weight 1.0).
    pub fn with_rule<R: PriorityRule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(WeightedRule {
            rule: Arc::new(rule),
            weight: 1.0,
        });
        self
    }

    /// Adds a weighted rule.
    pub fn with_weighted_rule<R: PriorityRule + 'static>(mut self, rule: R, weight: f64) -> Self {
        self.rules.push(WeightedRule {
            rule: Arc::new(rule),
            weight,
        });
        self
    }

    /// Number of rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Weighted sum of all rule scores.
    pub fn score(&self, input: &PriorityInput, context: &PriorityContext) -> RuleScore {
        self.rules
            .iter()
            .map(|wr| wr.rule.evaluate(input, context) * wr.weight)
            .sum()
    }

    /// Evaluates a single job and returns weighted scores from each rule.
    pub fn evaluate(&self, input: &PriorityInput, context: &PriorityContext) -> Vec<RuleScore> {
        self.rules
            .iter()
            .map(|wr| wr.rule.evaluate(input, context) * wr.weight)
            .collect()
    }

    /// Orders two scored jobs: higher score first, then by ID.
    pub fn compare(&self, a: (RuleScore, &str), b: (RuleScore, &str)) -> Ordering {
        if (a.0 - b.0).abs() > self.epsilon {
            return b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal);
        }
        a.1.cmp(b.1)
    }

    /// Sorts jobs by priority (most urgent first).
    ///
    /// Returns indices into the original slice.
    pub fn sort_indices(&self, inputs: &[PriorityInput], context: &PriorityContext) -> Vec<usize> {
        let scores: Vec<f64> = inputs.iter().map(|i| self.score(i, context)).collect();
        let mut indices: Vec<usize> = (0..inputs.len()).collect();
        indices.sort_by(|&a, &b| {
            self.compare(
                (scores[a], &inputs[a].job_id),
                (scores[b], &inputs[b].job_id),
            )
        });
        indices
    }

    /// Returns the index of the most urgent job.
    pub fn select_best(
        &self,
        inputs: &[PriorityInput],
        context: &PriorityContext,
    ) -> Option<usize> {
        self.sort_indices(inputs, context).first().copied()
    }
}

impl Default for PriorityEngine {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for PriorityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityEngine")
            .field(
                "rules",
                &self
                    .rules
                    .iter()
                    .map(|r| format!("{}(w={})", r.rule.name(), r.weight))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
