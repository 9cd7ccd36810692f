use crate::config::BalancerConfig;
use crate::core::trade_loop::{
    AdjustmentDirection, CandidateLoop, FairnessAdjustment, ParticipantBalance, TradeStep,
};
use crate::core::wallet::WalletId;
use crate::error::RejectionReason;
use crate::graph::want_graph::WantGraph;
use rust_decimal::Decimal;
use std::collections::HashMap;

const MAX_ADJUSTMENT_SCALE: u32 = 28;

/// A candidate loop that passed the fairness check, with its adjustments attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancedLoop {
    steps: Vec<TradeStep>,
    participants: Vec<ParticipantBalance>,
    total_value: Decimal,
}

impl BalancedLoop {
    /// Steps with `value_adjustment` set on each adjusted participant's step.
    pub fn steps(&self) -> &[TradeStep] {
        &self.steps
    }

    /// Per-participant accounting, in step order.
    pub fn participants(&self) -> &[ParticipantBalance] {
        &self.participants
    }

    /// Sum of the values of every item moved by the loop.
    pub fn total_value(&self) -> Decimal {
        self.total_value
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Signed adjustments over all participants. Zero for every balanced loop.
    pub fn adjustment_total(&self) -> Decimal {
        self.participants
            .iter()
            .filter_map(|p| p.adjustment.as_ref())
            .map(FairnessAdjustment::signed)
            .sum()
    }

    /// Largest post-adjustment residual of any participant.
    pub fn max_residual(&self) -> Decimal {
        self.participants
            .iter()
            .map(|p| p.residual.abs())
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn into_parts(self) -> (Vec<TradeStep>, Vec<ParticipantBalance>, Decimal) {
        (self.steps, self.participants, self.total_value)
    }
}

/// Outcome of balancing one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceOutcome {
    Balanced(BalancedLoop),
    Rejected(RejectionReason),
}

impl BalanceOutcome {
    pub fn is_balanced(&self) -> bool {
        matches!(self, BalanceOutcome::Balanced(_))
    }
}

/// Checks that every participant of a loop gives and receives roughly equal value.
///
/// # Algorithm
///
/// 1. For each participant, sum the captured values of the items it gives
///    and receives. `net_delta = received - given`, `traded = received + given`.
/// 2. Reject the loop if any participant trades zero value, or if any
///    `|net_delta|` exceeds `tolerance * traded`.
/// 3. Every participant gets `-net_delta` expressed in whole units of the
///    last `adjustment_scale` place: each share is first rounded down, then
///    the units still owed go one at a time to the largest fractional parts
///    (step order on ties). Each share therefore lies between the floor and
///    ceiling of its exact value, so positive deltas only ever pay and
///    negative deltas only ever receive, and the shares sum to exactly zero.
/// 4. The residual `net_delta + adjustment` is below one unit. A loop is
///    still rejected if some residual exceeds `tolerance * traded`, which
///    only happens when a participant trades less than one unit's worth
///    per tolerance fraction.
///
/// Sums that overflow `Decimal` reject the loop with `ValueOverflow`.
///
/// A tolerance of 0 accepts only perfectly even loops; a tolerance of 1
/// accepts every loop whose participants all trade nonzero value.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::prelude::*;
/// use tradeloop_engine::graph::cycle_detection::WalletCycle;
/// use tradeloop_engine::optimization::balancer::{BalanceOutcome, ValueBalancer};
/// use rust_decimal_macros::dec;
///
/// let store = PreferenceStore::new();
/// store.upsert_preference(WalletPreference::new("A", ["x"], ["y"]).unwrap()).unwrap();
/// store.upsert_preference(WalletPreference::new("B", ["y"], ["x"]).unwrap()).unwrap();
/// let values: ValuationTable = [
///     (ItemId::new("x"), Valuation::new(dec!(100), dec!(1))),
///     (ItemId::new("y"), Valuation::new(dec!(96), dec!(1))),
/// ]
/// .into_iter()
/// .collect();
///
/// let graph = WantGraph::build(&store.snapshot(), &values);
/// let cycle = WalletCycle::canonical(vec![WalletId::new("A"), WalletId::new("B")]);
/// let candidate = graph.candidate_loop(&cycle, 4);
///
/// let outcome = ValueBalancer::new(dec!(0.10), 2).balance(&candidate, &graph);
/// match outcome {
///     BalanceOutcome::Balanced(balanced) => assert_eq!(balanced.adjustment_total(), dec!(0)),
///     BalanceOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueBalancer {
    tolerance: Decimal,
    adjustment_scale: u32,
}

impl ValueBalancer {
    /// `adjustment_scale` is capped at 28, the most places a `Decimal` holds.
    pub fn new(tolerance: Decimal, adjustment_scale: u32) -> Self {
        Self {
            tolerance,
            adjustment_scale: adjustment_scale.min(MAX_ADJUSTMENT_SCALE),
        }
    }

    pub fn from_config(config: &BalancerConfig) -> Self {
        Self::new(config.tolerance, config.adjustment_scale)
    }

    pub fn tolerance(&self) -> Decimal {
        self.tolerance
    }

    pub fn adjustment_scale(&self) -> u32 {
        self.adjustment_scale
    }

    /// Balance one candidate against the valuations captured in `graph`.
    pub fn balance(&self, candidate: &CandidateLoop, graph: &WantGraph) -> BalanceOutcome {
        let totals = match Totals::tally(candidate, graph) {
            Ok(totals) => totals,
            Err(wallet) => return overflow(wallet),
        };

        let mut participants = Vec::with_capacity(candidate.len());
        let mut allowances = Vec::with_capacity(candidate.len());
        for wallet in candidate.wallets() {
            let given_value = totals.given.get(wallet).copied().unwrap_or_default();
            let received_value = totals.received.get(wallet).copied().unwrap_or_default();
            let Some(traded) = given_value.checked_add(received_value) else {
                return overflow(wallet);
            };
            if traded.is_zero() {
                return BalanceOutcome::Rejected(RejectionReason::ZeroValueParticipant {
                    wallet: wallet.clone(),
                });
            }

            let net_delta = received_value - given_value;
            let Some(allowed) = self.tolerance.checked_mul(traded) else {
                return overflow(wallet);
            };
            if net_delta.abs() > allowed {
                return BalanceOutcome::Rejected(RejectionReason::ImbalanceExceedsTolerance {
                    wallet: wallet.clone(),
                    delta: net_delta,
                    allowed,
                });
            }

            participants.push(ParticipantBalance {
                wallet: wallet.clone(),
                given_value,
                received_value,
                net_delta,
                residual: Decimal::ZERO,
                adjustment: None,
            });
            allowances.push(allowed);
        }

        let signed = match self.signed_adjustments(&participants) {
            Ok(signed) => signed,
            Err(i) => return overflow(&participants[i].wallet),
        };

        let mut steps = candidate.steps().to_vec();
        for (((participant, step), amount), allowed) in participants
            .iter_mut()
            .zip(&mut steps)
            .zip(signed)
            .zip(allowances)
        {
            let residual = participant.net_delta + amount;
            if residual.abs() > allowed {
                return BalanceOutcome::Rejected(RejectionReason::ImbalanceExceedsTolerance {
                    wallet: participant.wallet.clone(),
                    delta: residual,
                    allowed,
                });
            }
            let adjustment = to_adjustment(amount);
            participant.residual = residual;
            participant.adjustment = adjustment;
            step.value_adjustment = adjustment;
        }

        BalanceOutcome::Balanced(BalancedLoop {
            steps,
            participants,
            total_value: totals.total_value,
        })
    }

    /// Signed adjustment per participant (negative = pays), in whole units of
    /// the adjustment scale and summing to zero. Fails with the index of the
    /// participant whose share overflows.
    fn signed_adjustments(&self, participants: &[ParticipantBalance]) -> Result<Vec<Decimal>, usize> {
        let unit = Decimal::new(1, self.adjustment_scale);

        let mut units = Vec::with_capacity(participants.len());
        let mut fractions = Vec::with_capacity(participants.len());
        let mut owed = Decimal::ZERO;
        for (i, p) in participants.iter().enumerate() {
            let exact = (-p.net_delta).checked_div(unit).ok_or(i)?;
            let floor = exact.floor();
            owed = owed.checked_sub(floor).ok_or(i)?;
            units.push(floor);
            fractions.push(exact - floor);
        }

        // exact shares sum to zero, so `owed` counts the nonzero fractions to round up
        let mut order: Vec<usize> = (0..participants.len()).collect();
        order.sort_by(|&a, &b| fractions[b].cmp(&fractions[a]));
        for i in order {
            if owed <= Decimal::ZERO {
                break;
            }
            if fractions[i].is_zero() {
                continue;
            }
            units[i] = units[i].checked_add(Decimal::ONE).ok_or(i)?;
            owed -= Decimal::ONE;
        }

        units
            .into_iter()
            .enumerate()
            .map(|(i, u)| u.checked_mul(unit).ok_or(i))
            .collect()
    }
}

/// Value given and received per wallet, and moved in total.
struct Totals<'a> {
    given: HashMap<&'a WalletId, Decimal>,
    received: HashMap<&'a WalletId, Decimal>,
    total_value: Decimal,
}

impl<'a> Totals<'a> {
    /// Fails with the giver of the first step whose sums overflow.
    fn tally(candidate: &'a CandidateLoop, graph: &WantGraph) -> Result<Self, &'a WalletId> {
        let mut totals = Totals {
            given: HashMap::new(),
            received: HashMap::new(),
            total_value: Decimal::ZERO,
        };
        for step in candidate.steps() {
            let value = step
                .items
                .iter()
                .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(graph.value_of(item)))
                .ok_or(&step.from)?;
            add_to(totals.given.entry(&step.from).or_default(), value).ok_or(&step.from)?;
            add_to(totals.received.entry(&step.to).or_default(), value).ok_or(&step.from)?;
            add_to(&mut totals.total_value, value).ok_or(&step.from)?;
        }
        Ok(totals)
    }
}

fn add_to(sum: &mut Decimal, value: Decimal) -> Option<()> {
    *sum = sum.checked_add(value)?;
    Some(())
}

fn overflow(wallet: &WalletId) -> BalanceOutcome {
    BalanceOutcome::Rejected(RejectionReason::ValueOverflow {
        wallet: wallet.clone(),
    })
}

impl From<&BalancerConfig> for ValueBalancer {
    fn from(config: &BalancerConfig) -> Self {
        Self::from_config(config)
    }
}

fn to_adjustment(signed: Decimal) -> Option<FairnessAdjustment> {
    if signed.is_zero() {
        return None;
    }
    let direction = if signed.is_sign_negative() {
        AdjustmentDirection::Pay
    } else {
        AdjustmentDirection::Receive
    };
    Some(FairnessAdjustment {
        amount: signed.abs(),
        direction,
    })
}

impl std::fmt::Display for BalancedLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Balanced Loop ===")?;
        writeln!(f, "Participants:  {}", self.participants.len())?;
        writeln!(f, "Total Value:   {}", self.total_value)?;
        for p in &self.participants {
            let adjustment = match &p.adjustment {
                Some(adj) => format!("{} {:?}", adj.amount, adj.direction),
                None => "-".to_string(),
            };
            writeln!(
                f,
                "  {}: gives {} receives {} (delta {}, adjustment {})",
                p.wallet, p.given_value, p.received_value, p.net_delta, adjustment
            )?;
        }
        Ok(())
    }
}
