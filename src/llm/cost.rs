// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Cost calculation and per-run cost tracking.
//!
//! Costs are always computed from provider-reported token counts. The
//! pre-call estimate carried in `StageResult::calculated_tokens` is
//! diagnostic and never priced.
//!
//! # Example
//!
//! ```
//! use specforge::llm::cost::{CostCalculator, CostTracker};
//! use specforge::llm::provider::Pricing;
//!
//! let calculator = CostCalculator::new(Pricing {
//!     input_per_1k: 0.003,
//!     output_per_1k: 0.015,
//! });
//! // 1000 input tokens = $0.003, 500 output tokens = $0.0075
//! let cost = calculator.calculate_cost(1000, 500);
//! assert!((cost - 0.0105).abs() < 1e-9);
//!
//! let mut tracker = CostTracker::new();
//! tracker.add_operation("specifications", 1000, 500, cost);
//! tracker.add_operation("planner", 2000, 800, calculator.calculate_cost(2000, 800));
//! assert_eq!(tracker.operation_count(), 2);
//! ```

use crate::llm::provider::Pricing;
use serde::{Deserialize, Serialize};

/// Cost of one tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Operation name, typically the stage name.
    pub operation: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Cost in dollars.
    pub cost: f64,
}

/// Prices token counts for one model.
///
/// `Pricing` is expressed in dollars per 1,000 tokens.
#[derive(Debug, Clone)]
pub struct CostCalculator {
    pricing: Pricing,
}

impl CostCalculator {
    #[must_use]
    pub fn new(pricing: Pricing) -> Self {
        Self { pricing }
    }

    #[must_use]
    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    /// `input/1000 * input_per_1k + output/1000 * output_per_1k`.
    #[must_use]
    pub fn calculate_cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        self.calculate_input_cost(input_tokens) + self.calculate_output_cost(output_tokens)
    }

    /// Input-side cost only; used for dry-run estimates before any call.
    #[must_use]
    pub fn calculate_input_cost(&self, input_tokens: usize) -> f64 {
        (input_tokens as f64 / 1000.0) * self.pricing.input_per_1k
    }

    #[must_use]
    pub fn calculate_output_cost(&self, output_tokens: usize) -> f64 {
        (output_tokens as f64 / 1000.0) * self.pricing.output_per_1k
    }
}

/// Running record of every priced operation in a pipeline run.
///
/// Operations keep insertion order, which is the order stages completed.
#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    operations: Vec<CostBreakdown>,
}

impl CostTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation whose cost has already been priced.
    pub fn add_operation(
        &mut self,
        name: impl Into<String>,
        input_tokens: usize,
        output_tokens: usize,
        cost: f64,
    ) {
        self.operations.push(CostBreakdown {
            operation: name.into(),
            input_tokens,
            output_tokens,
            cost,
        });
    }

    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.operations.iter().map(|op| op.cost).sum()
    }

    #[must_use]
    pub fn total_input_tokens(&self) -> usize {
        self.operations.iter().map(|op| op.input_tokens).sum()
    }

    #[must_use]
    pub fn total_output_tokens(&self) -> usize {
        self.operations.iter().map(|op| op.output_tokens).sum()
    }

    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn breakdown(&self) -> &[CostBreakdown] {
        &self.operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> CostCalculator {
        CostCalculator::new(Pricing {
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        })
    }

    #[test]
    fn test_calculate_cost() {
        let cost = sonnet().calculate_cost(10_000, 2_000);
        assert!((cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_zero_pricing_is_free() {
        let calc = CostCalculator::new(Pricing::default());
        assert_eq!(calc.calculate_cost(1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn test_input_and_output_split() {
        let calc = sonnet();
        assert!((calc.calculate_input_cost(1000) - 0.003).abs() < 1e-12);
        assert!((calc.calculate_output_cost(1000) - 0.015).abs() < 1e-12);
    }

    #[test]
    fn test_tracker_totals_and_order() {
        let calc = sonnet();
        let mut tracker = CostTracker::new();
        tracker.add_operation("specifications", 1000, 100, calc.calculate_cost(1000, 100));
        tracker.add_operation("planner", 2000, 200, calc.calculate_cost(2000, 200));
        tracker.add_operation("coding", 3000, 300, calc.calculate_cost(3000, 300));

        assert_eq!(tracker.operation_count(), 3);
        assert_eq!(tracker.total_input_tokens(), 6000);
        assert_eq!(tracker.total_output_tokens(), 600);
        assert!((tracker.total_cost() - calc.calculate_cost(6000, 600)).abs() < 1e-9);

        let names: Vec<&str> = tracker
            .breakdown()
            .iter()
            .map(|op| op.operation.as_str())
            .collect();
        assert_eq!(names, vec!["specifications", "planner", "coding"]);
    }

    #[test]
    fn test_empty_tracker() {
        let tracker = CostTracker::new();
        assert_eq!(tracker.total_cost(), 0.0);
        assert_eq!(tracker.operation_count(), 0);
    }
}
