//! Spend ledger that caps cumulative generation-service cost per run.
//!
//! Amounts are integer nano-dollars so that `can_afford` comparisons are
//! exact: fifty calls of $0.002 fit a $0.10 budget, the fifty-first does not.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_USD: f64 = 1_000_000_000.0;

/// A monetary amount in nano-dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cost(u64);

impl Cost {
    pub const ZERO: Cost = Cost(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Cost(nanos)
    }

    /// Convert a dollar amount, rounding to the nearest nano-dollar. Negative
    /// and non-finite inputs map to zero.
    pub fn from_usd(usd: f64) -> Self {
        if !usd.is_finite() || usd <= 0.0 {
            return Cost::ZERO;
        }
        Cost((usd * NANOS_PER_USD).round() as u64)
    }

    pub fn nanos(self) -> u64 {
        self.0
    }

    pub fn as_usd(self) -> f64 {
        self.0 as f64 / NANOS_PER_USD
    }

    pub fn saturating_add(self, other: Cost) -> Cost {
        Cost(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Cost) -> Cost {
        Cost(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.4}", self.as_usd())
    }
}

/// Per-1K-token prices of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_per_1k: Cost,
    pub output_per_1k: Cost,
}

/// Model used for pricing when the requested model is unknown.
pub const FALLBACK_PRICING_MODEL: &str = "gpt-3.5-turbo";

const PRICING: &[(&str, u64, u64)] = &[
    ("gpt-4", 30_000_000, 60_000_000),
    ("gpt-4-turbo", 10_000_000, 30_000_000),
    ("gpt-3.5-turbo", 1_500_000, 2_000_000),
    ("gpt-3.5-turbo-16k", 3_000_000, 4_000_000),
];

pub fn pricing_for(model: &str) -> ModelPricing {
    let (_, input, output) = PRICING
        .iter()
        .find(|(name, _, _)| *name == model)
        .or_else(|| {
            PRICING
                .iter()
                .find(|(name, _, _)| *name == FALLBACK_PRICING_MODEL)
        })
        .copied()
        .unwrap_or(("", 0, 0));
    ModelPricing {
        input_per_1k: Cost::from_nanos(input),
        output_per_1k: Cost::from_nanos(output),
    }
}

/// Cost of a call with the given token counts, rounded up per direction.
pub fn estimate(prompt_tokens: u32, completion_tokens: u32, model: &str) -> Cost {
    let pricing = pricing_for(model);
    let part = |tokens: u32, per_1k: Cost| -> u64 {
        let scaled = u128::from(tokens) * u128::from(per_1k.nanos());
        scaled.div_ceil(1000).min(u128::from(u64::MAX)) as u64
    };
    Cost::from_nanos(
        part(prompt_tokens, pricing.input_per_1k)
            .saturating_add(part(completion_tokens, pricing.output_per_1k)),
    )
}

/// Rough token count for prompt text (four characters per token, rounded up).
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// One committed charge. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    pub timestamp: DateTime<Utc>,
    pub amount: Cost,
    pub description: String,
    pub model: String,
    pub tokens: u32,
}

/// Append-only spend log with a hard cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetLedger {
    limit: Cost,
    total: Cost,
    records: Vec<CostRecord>,
}

impl BudgetLedger {
    pub fn new(limit: Cost) -> Self {
        Self {
            limit,
            total: Cost::ZERO,
            records: Vec::new(),
        }
    }

    pub fn limit(&self) -> Cost {
        self.limit
    }

    pub fn total_spent(&self) -> Cost {
        self.total
    }

    pub fn records(&self) -> &[CostRecord] {
        &self.records
    }

    pub fn estimate(&self, prompt_tokens: u32, max_completion_tokens: u32, model: &str) -> Cost {
        estimate(prompt_tokens, max_completion_tokens, model)
    }

    /// `true` iff committing `cost` keeps total spend within the limit.
    pub fn can_afford(&self, cost: Cost) -> bool {
        self.total
            .nanos()
            .checked_add(cost.nanos())
            .is_some_and(|after| after <= self.limit.nanos())
    }

    pub fn record(&mut self, cost: Cost, model: &str, tokens: u32) {
        self.record_with_description(cost, model, tokens, "generation call");
    }

    pub fn record_with_description(
        &mut self,
        cost: Cost,
        model: &str,
        tokens: u32,
        description: &str,
    ) {
        self.records.push(CostRecord {
            timestamp: Utc::now(),
            amount: cost,
            description: description.to_string(),
            model: model.to_string(),
            tokens,
        });
        self.total = self.total.saturating_add(cost);
    }

    pub fn remaining(&self) -> Cost {
        self.limit.saturating_sub(self.total)
    }

    pub fn percent_used(&self) -> f64 {
        if self.limit == Cost::ZERO {
            return 100.0;
        }
        self.total.nanos() as f64 / self.limit.nanos() as f64 * 100.0
    }

    /// A single in-flight call may land slightly over its estimate.
    pub fn is_exceeded(&self) -> bool {
        self.total > self.limit
    }

    pub fn breakdown_by_model(&self) -> BTreeMap<String, Cost> {
        let mut breakdown = BTreeMap::new();
        for record in &self.records {
            let model = if record.model.is_empty() {
                "unknown".to_string()
            } else {
                record.model.clone()
            };
            let entry = breakdown.entry(model).or_insert(Cost::ZERO);
            *entry = entry.saturating_add(record.amount);
        }
        breakdown
    }
}

impl fmt::Display for BudgetLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Budget: {}/{} ({:.1}%)",
            self.total,
            self.limit,
            self.percent_used()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_afford_respects_limit() {
        let mut ledger = BudgetLedger::new(Cost::from_usd(0.10));
        assert!(ledger.can_afford(Cost::from_usd(0.05)));
        assert!(!ledger.can_afford(Cost::from_usd(0.15)));

        ledger.record(Cost::from_usd(0.05), "gpt-3.5-turbo", 100);
        assert_eq!(ledger.total_spent(), Cost::from_usd(0.05));
        assert!(ledger.can_afford(Cost::from_usd(0.04)));
        assert!(!ledger.can_afford(Cost::from_usd(0.06)));
    }

    #[test]
    fn exactly_fifty_calls_of_two_tenths_cent_fit_ten_cents() {
        let mut ledger = BudgetLedger::new(Cost::from_usd(0.10));
        let call = estimate(0, 1000, "gpt-3.5-turbo");
        assert_eq!(call, Cost::from_usd(0.002));

        let mut committed = 0;
        while ledger.can_afford(call) {
            ledger.record(call, "gpt-3.5-turbo", 1000);
            committed += 1;
        }
        assert_eq!(committed, 50);
        assert_eq!(ledger.total_spent(), ledger.limit());
        assert!(!ledger.is_exceeded());
        assert_eq!(ledger.remaining(), Cost::ZERO);
    }

    #[test]
    fn unknown_model_prices_as_fallback() {
        assert_eq!(
            estimate(1000, 1000, "some-new-model"),
            estimate(1000, 1000, FALLBACK_PRICING_MODEL)
        );
        assert_eq!(estimate(1000, 0, "gpt-4"), Cost::from_usd(0.03));
        assert_eq!(estimate(0, 1000, "gpt-4"), Cost::from_usd(0.06));
    }

    #[test]
    fn breakdown_groups_by_model() {
        let mut ledger = BudgetLedger::new(Cost::from_usd(1.0));
        ledger.record(Cost::from_usd(0.01), "gpt-4", 10);
        ledger.record(Cost::from_usd(0.02), "gpt-4", 10);
        ledger.record(Cost::from_usd(0.005), "", 10);

        let breakdown = ledger.breakdown_by_model();
        assert_eq!(breakdown.get("gpt-4"), Some(&Cost::from_usd(0.03)));
        assert_eq!(breakdown.get("unknown"), Some(&Cost::from_usd(0.005)));
        assert!((ledger.percent_used() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn zero_limit_reports_fully_used() {
        let ledger = BudgetLedger::new(Cost::ZERO);
        assert_eq!(ledger.percent_used(), 100.0);
        assert!(ledger.can_afford(Cost::ZERO));
        assert!(!ledger.can_afford(Cost::from_nanos(1)));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn display_shows_spend_and_percentage() {
        let mut ledger = BudgetLedger::new(Cost::from_usd(0.10));
        ledger.record(Cost::from_usd(0.025), "gpt-3.5-turbo", 1);
        assert_eq!(ledger.to_string(), "Budget: $0.0250/$0.1000 (25.0%)");
    }
}
