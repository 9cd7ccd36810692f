use crate::core::wallet::WalletId;
use crate::graph::want_graph::WantGraph;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Strongly connected components of a want graph.
///
/// Every trade loop lies entirely inside one component, and a component of
/// a single wallet can never host a loop (a wallet cannot want its own
/// item). The cycle search therefore only starts from, and only walks
/// within, components of two or more wallets.
#[derive(Debug, Clone, Default)]
pub struct ComponentIndex {
    component_of: HashMap<WalletId, usize>,
    components: Vec<Vec<WalletId>>,
}

impl ComponentIndex {
    /// Index the tradeable components of a graph (Tarjan's algorithm).
    pub fn build(graph: &WantGraph) -> Self {
        let mut g: DiGraph<&WalletId, ()> = DiGraph::new();
        let nodes: HashMap<&WalletId, NodeIndex> =
            graph.wallets().map(|w| (w, g.add_node(w))).collect();
        for wallet in graph.wallets() {
            for next in graph.successors(wallet) {
                g.add_edge(nodes[wallet], nodes[next], ());
            }
        }

        let mut components: Vec<Vec<WalletId>> = tarjan_scc(&g)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut wallets: Vec<WalletId> = scc.into_iter().map(|n| g[n].clone()).collect();
                wallets.sort();
                wallets
            })
            .collect();
        components.sort();

        let mut component_of = HashMap::new();
        for (idx, wallets) in components.iter().enumerate() {
            for wallet in wallets {
                component_of.insert(wallet.clone(), idx);
            }
        }
        Self {
            component_of,
            components,
        }
    }

    /// Tradeable components, each sorted, ordered by first wallet.
    pub fn components(&self) -> &[Vec<WalletId>] {
        &self.components
    }

    pub fn component_of(&self, wallet: &WalletId) -> Option<usize> {
        self.component_of.get(wallet).copied()
    }

    /// True when the wallet belongs to some component that can host a loop.
    pub fn is_tradeable(&self, wallet: &WalletId) -> bool {
        self.component_of.contains_key(wallet)
    }

    /// True when both wallets sit in the same tradeable component.
    pub fn same_component(&self, a: &WalletId, b: &WalletId) -> bool {
        match (self.component_of(a), self.component_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Wallets that can take part in at least one loop, in order.
    pub fn tradeable_wallets(&self) -> Vec<&WalletId> {
        let mut wallets: Vec<&WalletId> = self.components.iter().flatten().collect();
        wallets.sort();
        wallets
    }
}
