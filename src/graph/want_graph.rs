use crate::core::item::{Item, ItemId, ValuationProvider};
use crate::core::store::StoreSnapshot;
use crate::core::trade_loop::{CandidateLoop, TradeStep};
use crate::core::wallet::WalletId;
use crate::graph::cycle_detection::WalletCycle;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// A directed "wants" relation: `from` wants `item`, which `to` owns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WantEdge {
    pub from: WalletId,
    pub to: WalletId,
    pub item: ItemId,
}

/// Immutable want/have multigraph built from one store snapshot.
///
/// Nodes are wallets; an edge `A -> B` labelled `X` exists iff A wants X
/// and B owns X. Several edges may join the same pair of wallets. The graph
/// also captures the valuation of every owned item at build time, so all
/// later phases of a discovery pass are pure functions of the graph.
///
/// Building is O(items) and deterministic: two graphs built from the same
/// snapshot and valuations compare equal.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::prelude::*;
/// use std::collections::HashMap;
///
/// let store = PreferenceStore::new();
/// store.upsert_preference(WalletPreference::new("alice", ["x"], ["y"]).unwrap()).unwrap();
/// store.upsert_preference(WalletPreference::new("bob", ["y"], ["x"]).unwrap()).unwrap();
///
/// let graph = WantGraph::build(&store.snapshot(), &HashMap::new());
/// assert_eq!(graph.wallet_count(), 2);
/// assert_eq!(graph.edge_count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantGraph {
    version: u64,
    /// wallet -> outgoing edges, sorted by (to, item)
    adjacency: BTreeMap<WalletId, Vec<WantEdge>>,
    /// owned items with their owner and captured valuation
    items: BTreeMap<ItemId, Item>,
    edge_count: usize,
}

impl WantGraph {
    /// Build the graph for a snapshot, reading valuations once per owned item.
    pub fn build(snapshot: &StoreSnapshot, valuations: &dyn ValuationProvider) -> Self {
        let mut items = BTreeMap::new();
        for preference in snapshot.preferences() {
            for id in preference.owned() {
                let valuation = valuations.valuation(id).unwrap_or_default();
                items.insert(
                    id.clone(),
                    Item {
                        id: id.clone(),
                        owner: preference.wallet().clone(),
                        value: valuation.value,
                        liquidity: valuation.liquidity,
                    },
                );
            }
        }

        let mut adjacency: BTreeMap<WalletId, Vec<WantEdge>> = BTreeMap::new();
        let mut edge_count = 0;
        for preference in snapshot.preferences() {
            let wallet = preference.wallet();
            let mut edges: Vec<WantEdge> = preference
                .wanted()
                .iter()
                .filter_map(|wanted| {
                    let item = items.get(wanted)?;
                    (&item.owner != wallet).then(|| WantEdge {
                        from: wallet.clone(),
                        to: item.owner.clone(),
                        item: wanted.clone(),
                    })
                })
                .collect();
            edges.sort();
            edge_count += edges.len();
            adjacency.insert(wallet.clone(), edges);
        }

        Self {
            version: snapshot.version(),
            adjacency,
            items,
            edge_count,
        }
    }

    /// Store version this graph reflects.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All wallets with declarations, in order.
    pub fn wallets(&self) -> impl Iterator<Item = &WalletId> {
        self.adjacency.keys()
    }

    pub fn wallet_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn contains_wallet(&self, wallet: &WalletId) -> bool {
        self.adjacency.contains_key(wallet)
    }

    /// Outgoing want-edges of a wallet.
    pub fn outgoing(&self, wallet: &WalletId) -> &[WantEdge] {
        self.adjacency.get(wallet).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct wallets owning something this wallet wants, in order.
    pub fn successors(&self, wallet: &WalletId) -> Vec<&WalletId> {
        let mut out: Vec<&WalletId> = self.outgoing(wallet).iter().map(|e| &e.to).collect();
        out.dedup();
        out
    }

    /// Items `from` wants that `to` owns.
    pub fn items_between(&self, from: &WalletId, to: &WalletId) -> Vec<&ItemId> {
        self.outgoing(from)
            .iter()
            .filter(|e| &e.to == to)
            .map(|e| &e.item)
            .collect()
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn owner_of(&self, id: &ItemId) -> Option<&WalletId> {
        self.items.get(id).map(|i| &i.owner)
    }

    pub fn value_of(&self, id: &ItemId) -> Decimal {
        self.items.get(id).map(|i| i.value).unwrap_or(Decimal::ZERO)
    }

    pub fn edges(&self) -> impl Iterator<Item = &WantEdge> {
        self.adjacency.values().flatten()
    }

    /// Turn a want-cycle into transfer steps.
    ///
    /// For the cycle `[w0, w1, .., wn-1]` (w0 wants from w1, and so on) goods
    /// flow the opposite way, so the steps run `w0 -> wn-1 -> .. -> w1 -> w0`.
    /// Each step carries the items the receiver wants from the giver, capped
    /// at `max_items_per_step` (most valuable first).
    pub fn candidate_loop(&self, cycle: &WalletCycle, max_items_per_step: usize) -> CandidateLoop {
        let wallets = cycle.wallets();
        let n = wallets.len();
        let mut steps = Vec::with_capacity(n);
        for k in 0..n {
            let giver = &wallets[(n - k) % n];
            let receiver = &wallets[(2 * n - k - 1) % n];
            let mut items: Vec<&ItemId> = self.items_between(receiver, giver);
            items.sort_by(|a, b| self.value_of(b).cmp(&self.value_of(a)).then_with(|| a.cmp(b)));
            items.truncate(max_items_per_step.max(1));
            let items: BTreeSet<ItemId> = items.into_iter().cloned().collect();
            steps.push(TradeStep::new(
                giver.clone(),
                receiver.clone(),
                items.into_iter().collect(),
            ));
        }
        CandidateLoop::new(steps)
    }
}
