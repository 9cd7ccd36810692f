use crate::graph::want_graph::WantGraph;
use crate::optimization::balancer::BalancedLoop;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn default_balance_weight() -> Decimal {
    dec!(0.5)
}

fn default_length_weight() -> Decimal {
    dec!(0.3)
}

fn default_liquidity_weight() -> Decimal {
    dec!(0.2)
}

/// Relative weight of each efficiency sub-score.
///
/// Weights need not sum to one; the total is divided by their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_balance_weight")]
    pub balance: Decimal,
    #[serde(default = "default_length_weight")]
    pub length: Decimal,
    #[serde(default = "default_liquidity_weight")]
    pub liquidity: Decimal,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            balance: default_balance_weight(),
            length: default_length_weight(),
            liquidity: default_liquidity_weight(),
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> Decimal {
        self.balance + self.length + self.liquidity
    }
}

/// The three sub-scores of a loop and their weighted total, all in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyBreakdown {
    /// 100 for a perfectly even loop, falling with mean relative imbalance.
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    /// 100 for a two-party loop, 0 at the maximum length.
    #[serde(with = "rust_decimal::serde::float")]
    pub length: Decimal,
    /// Mean liquidity of the items moved, scaled to 100.
    #[serde(with = "rust_decimal::serde::float")]
    pub liquidity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

/// Scores balanced loops so they can be ranked.
///
/// Shorter, more even loops over liquid items score higher: every extra
/// participant is another party who may withdraw before settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EfficiencyScorer {
    weights: ScoringWeights,
    max_cycle_length: usize,
}

impl EfficiencyScorer {
    pub fn new(weights: ScoringWeights, max_cycle_length: usize) -> Self {
        Self {
            weights,
            max_cycle_length,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score one balanced loop. Pure and deterministic; never panics.
    pub fn score(&self, balanced: &BalancedLoop, graph: &WantGraph) -> EfficiencyBreakdown {
        let balance = self.balance_score(balanced);
        let length = self.length_score(balanced.len());
        let liquidity = Self::liquidity_score(balanced, graph);

        let weight_total = self.weights.total();
        let total = if weight_total <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            let weighted = self.weights.balance * balance
                + self.weights.length * length
                + self.weights.liquidity * liquidity;
            clamp_score(weighted / weight_total)
        };

        EfficiencyBreakdown {
            balance,
            length,
            liquidity,
            total: total.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        }
    }

    fn balance_score(&self, balanced: &BalancedLoop) -> Decimal {
        let participants = balanced.participants();
        if participants.is_empty() {
            return Decimal::ZERO;
        }
        let imbalance: Decimal = participants
            .iter()
            .map(|p| {
                let traded = p.traded_value();
                if traded.is_zero() {
                    Decimal::ONE
                } else {
                    p.net_delta.abs() / traded
                }
            })
            .sum();
        let mean = imbalance / Decimal::from(participants.len());
        clamp_score(HUNDRED * (Decimal::ONE - mean))
    }

    fn length_score(&self, len: usize) -> Decimal {
        if self.max_cycle_length <= 2 {
            return HUNDRED;
        }
        let extra = Decimal::from(len.saturating_sub(2));
        let span = Decimal::from(self.max_cycle_length - 2);
        clamp_score(HUNDRED * (Decimal::ONE - extra / span))
    }

    fn liquidity_score(balanced: &BalancedLoop, graph: &WantGraph) -> Decimal {
        let liquidities: Vec<Decimal> = balanced
            .steps()
            .iter()
            .flat_map(|s| s.items.iter())
            .map(|id| graph.item(id).map(|i| i.liquidity).unwrap_or(Decimal::ZERO))
            .collect();
        if liquidities.is_empty() {
            return Decimal::ZERO;
        }
        let mean = liquidities.iter().sum::<Decimal>() / Decimal::from(liquidities.len());
        clamp_score(HUNDRED * mean)
    }
}

fn clamp_score(score: Decimal) -> Decimal {
    score.max(Decimal::ZERO).min(HUNDRED)
}

impl std::fmt::Display for EfficiencyBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Efficiency ===")?;
        writeln!(f, "Balance:    {:.2}", self.balance)?;
        writeln!(f, "Length:     {:.2}", self.length)?;
        writeln!(f, "Liquidity:  {:.2}", self.liquidity)?;
        writeln!(f, "Total:      {:.2}", self.total)
    }
}
