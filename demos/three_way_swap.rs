//! Three-way swap between collectors.
//!
//! Nobody in this pool can trade pairwise, but the three wants close a
//! loop. Walks the pipeline step by step, then runs the same pool through
//! the engine and prints what a stream consumer would receive.

use rust_decimal_macros::dec;
use std::sync::Arc;
use tradeloop_engine::config::EngineConfig;
use tradeloop_engine::core::item::{ItemId, ValuationTable};
use tradeloop_engine::core::preference::WalletPreference;
use tradeloop_engine::core::store::PreferenceStore;
use tradeloop_engine::engine::TradeLoopEngine;
use tradeloop_engine::graph::cycle_detection::{find_cycles, SearchBudget, SearchGuard};
use tradeloop_engine::graph::scc::ComponentIndex;
use tradeloop_engine::graph::want_graph::WantGraph;
use tradeloop_engine::optimization::balancer::{BalanceOutcome, ValueBalancer};
use tradeloop_engine::optimization::efficiency::EfficiencyScorer;
use tradeloop_engine::session::result::DiscoveryQuery;

fn main() {
    println!("╔═══════════════════════════════════════════════╗");
    println!("║  tradeloop-engine: Three-Way Swap Discovery   ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    let values = ValuationTable::new();
    values.set(ItemId::new("punk-17"), dec!(1200), dec!(0.9)).unwrap();
    values.set(ItemId::new("ape-204"), dec!(1250), dec!(0.8)).unwrap();
    values.set(ItemId::new("cat-9"), dec!(1180), dec!(0.6)).unwrap();
    values.set(ItemId::new("owl-3"), dec!(40), dec!(0.2)).unwrap();

    let preferences = vec![
        WalletPreference::new("alice", ["punk-17"], ["ape-204"]).unwrap(),
        WalletPreference::new("bob", ["ape-204"], ["cat-9"]).unwrap(),
        WalletPreference::new("carol", ["cat-9"], ["punk-17"]).unwrap(),
        // wants something, offers nothing anyone wants
        WalletPreference::new("dave", ["owl-3"], ["punk-17"]).unwrap(),
    ];

    println!("Declarations:");
    println!("  alice: has punk-17 ($1200), wants ape-204");
    println!("  bob:   has ape-204 ($1250), wants cat-9");
    println!("  carol: has cat-9   ($1180), wants punk-17");
    println!("  dave:  has owl-3   ($40),   wants punk-17\n");

    let store = PreferenceStore::new();
    for preference in &preferences {
        store.upsert_preference(preference.clone()).unwrap();
    }
    let graph = WantGraph::build(&store.snapshot(), &values);

    println!("━━━ Tradeable Components ━━━\n");
    let index = ComponentIndex::build(&graph);
    for (i, component) in index.components().iter().enumerate() {
        let wallets: Vec<String> = component.iter().map(|w| w.to_string()).collect();
        println!("  Component {}: [{}]", i, wallets.join(", "));
    }
    println!();

    println!("━━━ Want Cycles ━━━\n");
    let guard = SearchGuard::new(SearchBudget::unbounded());
    let search = find_cycles(&graph, 5, &guard);
    for cycle in &search.cycles {
        let wallets: Vec<String> = cycle.wallets().iter().map(|w| w.to_string()).collect();
        println!("  {} → {}", wallets.join(" → "), wallets[0]);
    }
    println!();

    let config = EngineConfig::default();
    let balancer = ValueBalancer::from_config(&config.balancer);
    let scorer = EfficiencyScorer::new(config.scoring, config.discovery.max_cycle_length);
    for cycle in &search.cycles {
        let candidate = graph.candidate_loop(cycle, config.discovery.max_items_per_step);
        match balancer.balance(&candidate, &graph) {
            BalanceOutcome::Balanced(balanced) => {
                println!("{}", balanced);
                println!("{}", scorer.score(&balanced, &graph));
            }
            BalanceOutcome::Rejected(reason) => println!("  Rejected: {}\n", reason),
        }
    }

    println!("━━━ Engine Stream ━━━\n");
    let engine = TradeLoopEngine::new(config, Arc::new(values)).unwrap();
    let stream = engine.subscribe();
    for preference in preferences {
        engine.upsert_preference(preference).unwrap();
    }
    let result = engine.discover(&DiscoveryQuery::for_wallet("alice")).unwrap();
    for message in stream.try_iter() {
        println!("  {}", message.to_json().unwrap_or_default());
    }

    println!(
        "\n  {} loop(s) for alice at store version {}",
        result.loops.len(),
        result.store_version
    );
}
