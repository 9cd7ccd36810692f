use crate::core::item::ItemId;
use crate::core::pool::PoolState;
use crate::core::trade_loop::TradeLoop;
use crate::core::wallet::WalletId;
use crate::error::PassFailure;
use crate::graph::cycle_detection::SearchOutcome;
use crate::session::WireStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// What a discovery pass is asked for.
///
/// The default query returns every loop in the pool. With a focus wallet
/// only loops through that wallet are searched; `has_item` and `wants_item`
/// further require the focus wallet to give, respectively receive, that item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQuery {
    pub focus: Option<WalletId>,
    pub has_item: Option<ItemId>,
    pub wants_item: Option<ItemId>,
}

impl DiscoveryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_wallet(wallet: impl Into<WalletId>) -> Self {
        Self {
            focus: Some(wallet.into()),
            ..Self::default()
        }
    }

    pub fn giving(mut self, item: impl Into<ItemId>) -> Self {
        self.has_item = Some(item.into());
        self
    }

    pub fn wanting(mut self, item: impl Into<ItemId>) -> Self {
        self.wants_item = Some(item.into());
        self
    }

    /// True when the loop satisfies every filter of the query.
    pub fn matches(&self, trade: &TradeLoop) -> bool {
        let Some(wallet) = &self.focus else {
            return true;
        };
        trade.involves(wallet)
            && self.has_item.as_ref().map_or(true, |item| trade.gives(wallet, item))
            && self
                .wants_item
                .as_ref()
                .map_or(true, |item| trade.receives(wallet, item))
    }
}

/// Best loops first: efficiency, then estimated value, then id.
pub fn rank_order(a: &TradeLoop, b: &TradeLoop) -> Ordering {
    b.efficiency()
        .cmp(&a.efficiency())
        .then_with(|| b.estimated_value().cmp(&a.estimated_value()))
        .then_with(|| a.id().cmp(&b.id()))
}

/// Counters of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStats {
    pub cycles_found: usize,
    pub loops_balanced: usize,
    pub rejected_imbalance: usize,
    pub rejected_zero_value: usize,
    pub rejected_overflow: usize,
    /// Balanced loops dropped by the query filters.
    pub filtered_out: usize,
    pub explored_paths: usize,
    pub search_ms: u64,
    pub total_ms: u64,
}

impl PassStats {
    pub fn rejected(&self) -> usize {
        self.rejected_imbalance + self.rejected_zero_value + self.rejected_overflow
    }
}

/// A published pass: ranked loops plus the pool state of the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub pass_id: Uuid,
    pub store_version: u64,
    /// Valuation provider version read before the graph was built.
    pub valuation_version: u64,
    pub query: DiscoveryQuery,
    pub loops: Vec<TradeLoop>,
    pub pool_state: PoolState,
    /// The search budget ran out; other loops may exist.
    pub partial: bool,
    pub search_outcome: SearchOutcome,
    pub stats: PassStats,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DiscoveryResult {
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn metrics(&self) -> PassMetrics {
        PassMetrics {
            pass_id: self.pass_id,
            store_version: self.store_version,
            pool_state: self.pool_state,
            loops: self.loops.len(),
            partial: self.partial,
            stats: self.stats,
        }
    }

    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            pass_id: self.pass_id,
            store_version: self.store_version,
            status: WireStatus::Ready,
            loops: self.loops.len(),
            partial: self.partial,
            failure: None,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Summary streamed after each published pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassMetrics {
    pub pass_id: Uuid,
    pub store_version: u64,
    pub pool_state: PoolState,
    pub loops: usize,
    pub partial: bool,
    #[serde(flatten)]
    pub stats: PassStats,
}

/// One finished pass, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub pass_id: Uuid,
    pub store_version: u64,
    pub status: WireStatus,
    pub loops: usize,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PassFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trade_loop::TradeStep;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn two_party(a: &str, b: &str, x: &str, y: &str, efficiency: Decimal, value: Decimal) -> TradeLoop {
        TradeLoop::new(
            vec![
                TradeStep::new(WalletId::new(a), WalletId::new(b), vec![ItemId::new(x)]),
                TradeStep::new(WalletId::new(b), WalletId::new(a), vec![ItemId::new(y)]),
            ],
            Vec::new(),
            efficiency,
            value,
            Utc::now(),
            chrono::Duration::hours(1),
        )
    }

    #[test]
    fn test_query_filters() {
        let trade = two_party("A", "B", "x", "y", dec!(90), dec!(10));
        assert!(DiscoveryQuery::all().matches(&trade));
        assert!(DiscoveryQuery::for_wallet("A").matches(&trade));
        assert!(!DiscoveryQuery::for_wallet("C").matches(&trade));
        assert!(DiscoveryQuery::for_wallet("A").giving("x").matches(&trade));
        assert!(!DiscoveryQuery::for_wallet("A").giving("y").matches(&trade));
        assert!(DiscoveryQuery::for_wallet("A").wanting("y").matches(&trade));
        assert!(!DiscoveryQuery::for_wallet("B").wanting("y").matches(&trade));
    }

    #[test]
    fn test_rank_order() {
        let low = two_party("A", "B", "x", "y", dec!(80), dec!(500));
        let high = two_party("C", "D", "p", "q", dec!(95), dec!(10));
        let high_rich = two_party("E", "F", "r", "s", dec!(95), dec!(20));
        let mut loops = vec![low.clone(), high.clone(), high_rich.clone()];
        loops.sort_by(rank_order);
        assert_eq!(loops, vec![high_rich, high, low]);
    }

    #[test]
    fn test_metrics_flatten_stats() {
        let metrics = PassMetrics {
            pass_id: Uuid::nil(),
            store_version: 4,
            pool_state: PoolState::default(),
            loops: 2,
            partial: false,
            stats: PassStats {
                cycles_found: 3,
                ..PassStats::default()
            },
        };
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["cyclesFound"], 3);
        assert_eq!(json["storeVersion"], 4);
    }
}
