use crate::core::item::ItemId;
use crate::core::wallet::WalletId;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Which way a fairness adjustment flows for the participant it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentDirection {
    /// The participant received more value than it gave and pays the difference.
    Pay,
    /// The participant gave more value than it received and is compensated.
    Receive,
}

/// A residual monetary transfer compensating one participant's imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairnessAdjustment {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub direction: AdjustmentDirection,
}

impl FairnessAdjustment {
    /// Amount from the participant's point of view: negative when paying.
    pub fn signed(&self) -> Decimal {
        match self.direction {
            AdjustmentDirection::Pay => -self.amount,
            AdjustmentDirection::Receive => self.amount,
        }
    }
}

/// One hop of a trade loop: `from` hands `items` to `to`.
///
/// The adjustment, if any, belongs to the giver of this step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStep {
    pub from: WalletId,
    pub to: WalletId,
    pub items: Vec<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_adjustment: Option<FairnessAdjustment>,
}

impl TradeStep {
    pub fn new(from: WalletId, to: WalletId, items: Vec<ItemId>) -> Self {
        Self {
            from,
            to,
            items,
            value_adjustment: None,
        }
    }
}

/// Value accounting for one participant of a loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantBalance {
    pub wallet: WalletId,
    #[serde(with = "rust_decimal::serde::float")]
    pub given_value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub received_value: Decimal,
    /// received - given, before any adjustment.
    #[serde(with = "rust_decimal::serde::float")]
    pub net_delta: Decimal,
    /// Left over after applying the adjustment (rounding only).
    #[serde(with = "rust_decimal::serde::float")]
    pub residual: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<FairnessAdjustment>,
}

impl ParticipantBalance {
    pub fn traded_value(&self) -> Decimal {
        self.given_value + self.received_value
    }
}

/// Check the structural invariants of a sequence of steps.
///
/// The steps must chain (`steps[i].to == steps[i + 1].from`) and close back
/// to the first giver, involve at least two distinct wallets with none
/// repeated, move at least one item per step, and never have a wallet give
/// an item it also receives.
pub fn verify_steps(steps: &[TradeStep]) -> bool {
    if steps.len() < 2 {
        return false;
    }
    let n = steps.len();
    for i in 0..n {
        if steps[i].to != steps[(i + 1) % n].from || steps[i].items.is_empty() {
            return false;
        }
    }
    let givers: HashSet<&WalletId> = steps.iter().map(|s| &s.from).collect();
    if givers.len() != n {
        return false;
    }

    let mut given: HashMap<&WalletId, HashSet<&ItemId>> = HashMap::new();
    let mut moved: HashSet<&ItemId> = HashSet::new();
    for step in steps {
        for item in &step.items {
            if !moved.insert(item) {
                return false;
            }
            given.entry(&step.from).or_default().insert(item);
        }
    }
    steps.iter().all(|step| {
        given
            .get(&step.to)
            .map_or(true, |own| step.items.iter().all(|item| !own.contains(item)))
    })
}

/// An unscored loop as assembled from a want-graph cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLoop {
    steps: Vec<TradeStep>,
}

impl CandidateLoop {
    pub fn new(steps: Vec<TradeStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[TradeStep] {
        &self.steps
    }

    /// Number of participants (equal to the number of steps).
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Participants in step order.
    pub fn wallets(&self) -> impl Iterator<Item = &WalletId> {
        self.steps.iter().map(|s| &s.from)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemId> {
        self.steps.iter().flat_map(|s| s.items.iter())
    }

    pub fn verify(&self) -> bool {
        verify_steps(&self.steps)
    }

    pub fn into_steps(self) -> Vec<TradeStep> {
        self.steps
    }
}

/// A discovered, balanced and scored trade loop.
///
/// Immutable once built. When the preferences it was derived from change,
/// the loop is superseded by the next discovery pass rather than updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLoop {
    id: Uuid,
    steps: Vec<TradeStep>,
    total_participants: usize,
    #[serde(with = "rust_decimal::serde::float")]
    efficiency: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    estimated_value: Decimal,
    #[serde(default)]
    participants: Vec<ParticipantBalance>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TradeLoop {
    pub fn new(
        steps: Vec<TradeStep>,
        participants: Vec<ParticipantBalance>,
        efficiency: Decimal,
        estimated_value: Decimal,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: loop_id(&steps),
            total_participants: steps.len(),
            steps,
            efficiency,
            estimated_value,
            participants,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn steps(&self) -> &[TradeStep] {
        &self.steps
    }

    pub fn total_participants(&self) -> usize {
        self.total_participants
    }

    pub fn efficiency(&self) -> Decimal {
        self.efficiency
    }

    pub fn estimated_value(&self) -> Decimal {
        self.estimated_value
    }

    pub fn participants(&self) -> &[ParticipantBalance] {
        &self.participants
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn verify(&self) -> bool {
        verify_steps(&self.steps)
    }

    pub fn involves(&self, wallet: &WalletId) -> bool {
        self.steps.iter().any(|s| &s.from == wallet)
    }

    pub fn gives(&self, wallet: &WalletId, item: &ItemId) -> bool {
        self.steps
            .iter()
            .any(|s| &s.from == wallet && s.items.contains(item))
    }

    pub fn receives(&self, wallet: &WalletId, item: &ItemId) -> bool {
        self.steps
            .iter()
            .any(|s| &s.to == wallet && s.items.contains(item))
    }

    /// Signed adjustments over all participants; zero for a consistent loop.
    pub fn adjustment_total(&self) -> Decimal {
        self.steps
            .iter()
            .filter_map(|s| s.value_adjustment.as_ref())
            .map(FairnessAdjustment::signed)
            .sum()
    }
}

/// Deterministic id: the same steps always produce the same id.
fn loop_id(steps: &[TradeStep]) -> Uuid {
    let key = steps
        .iter()
        .map(|s| {
            let items: Vec<&str> = s.items.iter().map(ItemId::as_str).collect();
            format!("{}>{}:{}", s.from, s.to, items.join(","))
        })
        .collect::<Vec<_>>()
        .join("|");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}
