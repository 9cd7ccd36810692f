use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tradeloop_engine::api::{DiscoveryRequest, OneOrMany, PoolInput, PreferenceInput};
use tradeloop_engine::config::EngineConfig;
use tradeloop_engine::core::item::{ItemId, Valuation, ValuationTable};
use tradeloop_engine::core::preference::WalletPreference;
use tradeloop_engine::core::store::PreferenceStore;
use tradeloop_engine::core::trade_loop::AdjustmentDirection;
use tradeloop_engine::core::wallet::WalletId;
use tradeloop_engine::engine::TradeLoopEngine;
use tradeloop_engine::error::PassFailure;
use tradeloop_engine::graph::cycle_detection::{find_cycles, SearchBudget, SearchGuard};
use tradeloop_engine::graph::want_graph::WantGraph;
use tradeloop_engine::session::result::DiscoveryQuery;
use tradeloop_engine::session::stream::StreamMessage;
use tradeloop_engine::session::{DiscoverySession, SessionStatus, WireStatus};
use tradeloop_engine::simulation::pool_generator::{generate_pool, PoolConfig};

fn table(items: &[(&str, Decimal, Decimal)]) -> ValuationTable {
    items
        .iter()
        .map(|(id, value, liquidity)| (ItemId::new(*id), Valuation::new(*value, *liquidity)))
        .collect()
}

fn pref(wallet: &str, owned: &[&str], wanted: &[&str]) -> WalletPreference {
    WalletPreference::new(wallet, owned.iter().copied(), wanted.iter().copied()).unwrap()
}

fn session_with(
    config: EngineConfig,
    values: ValuationTable,
    prefs: Vec<WalletPreference>,
) -> DiscoverySession {
    let store = Arc::new(PreferenceStore::new());
    for p in prefs {
        store.upsert_preference(p).unwrap();
    }
    DiscoverySession::new(store, Arc::new(values), config).unwrap()
}

fn three_way(config: EngineConfig) -> DiscoverySession {
    // A wants B's item, B wants C's, C wants A's; values spread by 8%
    session_with(
        config,
        table(&[
            ("a1", dec!(100), dec!(0.8)),
            ("b1", dec!(104), dec!(0.8)),
            ("c1", dec!(108), dec!(0.8)),
        ]),
        vec![
            pref("A", &["a1"], &["b1"]),
            pref("B", &["b1"], &["c1"]),
            pref("C", &["c1"], &["a1"]),
        ],
    )
}

/// Equal-value swap between two wallets.
#[test]
fn two_party_equal_value_swap() {
    let session = session_with(
        EngineConfig::default(),
        table(&[("X", dec!(250), dec!(0.9)), ("Y", dec!(250), dec!(0.9))]),
        vec![pref("A", &["X"], &["Y"]), pref("B", &["Y"], &["X"])],
    );

    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert_eq!(result.loops.len(), 1);
    assert!(!result.partial);

    let trade = &result.loops[0];
    assert_eq!(trade.total_participants(), 2);
    assert!(trade.verify());
    assert!(trade.steps().iter().all(|s| s.value_adjustment.is_none()));
    assert_eq!(trade.adjustment_total(), Decimal::ZERO);
    assert_eq!(trade.estimated_value(), dec!(500));
    assert!(trade.efficiency() >= dec!(90), "got {}", trade.efficiency());
    assert_eq!(session.status(), SessionStatus::Ready);
}

/// Three-party ring within tolerance gets offsetting adjustments.
#[test]
fn three_party_ring_with_adjustments() {
    let session = three_way(EngineConfig::default());
    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert_eq!(result.loops.len(), 1);

    let trade = &result.loops[0];
    assert_eq!(trade.total_participants(), 3);
    assert!(trade.verify());
    assert_eq!(trade.adjustment_total(), Decimal::ZERO);

    let adjustments: Vec<_> = trade
        .steps()
        .iter()
        .filter_map(|s| s.value_adjustment.map(|adj| (s.from.clone(), adj)))
        .collect();
    assert_eq!(adjustments.len(), 3);

    // C gives 108 and receives 100: compensated 8
    let (_, c_adj) = adjustments
        .iter()
        .find(|(w, _)| w == &WalletId::new("C"))
        .unwrap();
    assert_eq!(c_adj.direction, AdjustmentDirection::Receive);
    assert_eq!(c_adj.amount, dec!(8));
    for (wallet, adj) in &adjustments {
        if wallet != &WalletId::new("C") {
            assert_eq!(adj.direction, AdjustmentDirection::Pay);
            assert_eq!(adj.amount, dec!(4));
        }
    }

    for p in trade.participants() {
        assert_eq!(p.residual, Decimal::ZERO);
    }
}

/// Nothing anyone wants is owned by anyone else.
#[test]
fn no_matches_yields_empty_result_with_pool_state() {
    let session = session_with(
        EngineConfig::default(),
        table(&[("x", dec!(1), dec!(1)), ("y", dec!(1), dec!(1))]),
        vec![
            pref("A", &["x"], &["unlisted-1"]),
            pref("B", &["y"], &["unlisted-2"]),
            pref("C", &[], &["unlisted-3"]),
        ],
    );

    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.stats.cycles_found, 0);
    assert_eq!(result.pool_state.wallet_count, 3);
    assert_eq!(result.pool_state.item_count, 2);
}

/// A withdrawal landing while the search runs makes the pass stale; the
/// retried pass no longer sees the withdrawn wallet.
#[test]
fn withdrawal_mid_pass_fails_stale_then_excludes_wallet() {
    let session = Arc::new(session_with(
        EngineConfig::default(),
        table(&[
            ("a1", dec!(50), dec!(1)),
            ("b1", dec!(50), dec!(1)),
            ("c1", dec!(50), dec!(1)),
        ]),
        vec![
            pref("A", &["a1"], &["b1", "c1"]),
            pref("B", &["b1"], &["a1"]),
            pref("C", &["c1"], &["a1"]),
        ],
    ));

    let store = session.store().clone();
    let fired = Arc::new(AtomicBool::new(false));
    let once = fired.clone();
    session.add_sink(Arc::new(move |message: &StreamMessage| {
        let searching = matches!(
            message,
            StreamMessage::Status {
                status: WireStatus::Searching
            }
        );
        if searching && !once.swap(true, Ordering::SeqCst) {
            store.remove_wallet(&WalletId::new("C"));
        }
    }));

    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert!(fired.load(Ordering::SeqCst));

    let history = session.history();
    assert_eq!(history.len(), 2);
    assert!(matches!(
        history[0].failure,
        Some(PassFailure::StaleSnapshot {
            pass_version: 3,
            current_version: 4
        })
    ));
    assert_eq!(history[1].status, WireStatus::Ready);

    assert_eq!(result.store_version, 4);
    assert_eq!(result.loops.len(), 1);
    let c = WalletId::new("C");
    assert!(result.loops.iter().all(|l| !l.involves(&c)));
    assert_eq!(session.metrics().passes_failed, 1);
}

#[test]
fn explicit_cancel_is_not_retried() {
    let session = Arc::new(three_way(EngineConfig::default()));
    let weak = Arc::downgrade(&session);
    session.add_sink(Arc::new(move |message: &StreamMessage| {
        if let StreamMessage::Status {
            status: WireStatus::Building,
        } = message
        {
            if let Some(session) = weak.upgrade() {
                session.cancel();
            }
        }
    }));

    let err = session.discover(&DiscoveryQuery::all()).unwrap_err();
    assert_eq!(err.to_string(), "pass cancelled");
    assert_eq!(session.status(), SessionStatus::Failed(PassFailure::Cancelled));
    assert_eq!(session.history().len(), 1);
}

/// Re-issuing the same request returns the same loops without a new pass.
#[test]
fn identical_requests_are_idempotent() {
    let values = table(&[("x", dec!(10), dec!(1)), ("y", dec!(10), dec!(1))]);
    let engine = TradeLoopEngine::new(EngineConfig::default(), Arc::new(values)).unwrap();
    engine
        .submit_preference(PreferenceInput {
            wallet_address: "bob".into(),
            owned_item_or_items: OneOrMany::One("y".into()),
            wanted_item_or_items: OneOrMany::One("x".into()),
            expires_at: None,
        })
        .unwrap();

    let request = DiscoveryRequest {
        wallet_address: "alice".into(),
        has_item: Some("x".into()),
        wants_item: Some("y".into()),
    };
    let first = engine.handle_discovery_request(&request);
    let second = engine.handle_discovery_request(&request);

    assert!(first.success);
    assert_eq!(first.trades.len(), 1);
    assert_eq!(first, second);
    assert_eq!(first.trades[0].id(), second.trades[0].id());
    assert_eq!(engine.session().metrics().passes_completed, 1);
    assert!(engine.session().metrics().cache_hits >= 1);
}

#[test]
fn zero_tolerance_rejects_uneven_loops() {
    let mut config = EngineConfig::default();
    config.balancer.tolerance = Decimal::ZERO;
    let session = three_way(config);

    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.stats.cycles_found, 1);
    assert_eq!(result.stats.rejected_imbalance, 1);
}

#[test]
fn full_tolerance_accepts_any_nonzero_loop() {
    let mut config = EngineConfig::default();
    config.balancer.tolerance = Decimal::ONE;
    let session = session_with(
        config,
        table(&[("cheap", dec!(1), dec!(0.5)), ("rare", dec!(1000), dec!(0.5))]),
        vec![pref("A", &["cheap"], &["rare"]), pref("B", &["rare"], &["cheap"])],
    );

    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert_eq!(result.loops.len(), 1);
    assert_eq!(result.loops[0].adjustment_total(), Decimal::ZERO);
}

#[test]
fn unpriced_items_are_rejected_as_zero_value() {
    let session = session_with(
        EngineConfig::default(),
        ValuationTable::new(),
        vec![pref("A", &["x"], &["y"]), pref("B", &["y"], &["x"])],
    );
    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.stats.rejected_zero_value, 1);
}

#[test]
fn focused_query_filters_by_wallet_and_item() {
    let session = session_with(
        EngineConfig::default(),
        table(&[
            ("a1", dec!(10), dec!(1)),
            ("b1", dec!(10), dec!(1)),
            ("c1", dec!(10), dec!(1)),
            ("d1", dec!(10), dec!(1)),
        ]),
        vec![
            pref("A", &["a1"], &["b1"]),
            pref("B", &["b1"], &["a1"]),
            pref("C", &["c1"], &["d1"]),
            pref("D", &["d1"], &["c1"]),
        ],
    );

    let all = session.discover(&DiscoveryQuery::all()).unwrap();
    assert_eq!(all.loops.len(), 2);

    let for_c = session.discover(&DiscoveryQuery::for_wallet("C")).unwrap();
    assert_eq!(for_c.loops.len(), 1);
    assert!(for_c.loops[0].involves(&WalletId::new("C")));

    let giving = session
        .discover(&DiscoveryQuery::for_wallet("A").giving("b1"))
        .unwrap();
    assert!(giving.is_empty());
    let wanting = session
        .discover(&DiscoveryQuery::for_wallet("A").wanting("b1"))
        .unwrap();
    assert_eq!(wanting.loops.len(), 1);
}

#[test]
fn loops_are_ranked_by_efficiency() {
    let mut config = EngineConfig::default();
    config.balancer.tolerance = dec!(0.5);
    let session = session_with(
        config,
        table(&[
            ("a1", dec!(100), dec!(1)),
            ("b1", dec!(100), dec!(1)),
            ("c1", dec!(100), dec!(1)),
            ("d1", dec!(60), dec!(0.4)),
        ]),
        vec![
            pref("A", &["a1"], &["b1"]),
            pref("B", &["b1"], &["a1"]),
            pref("C", &["c1"], &["d1"]),
            pref("D", &["d1"], &["c1"]),
        ],
    );

    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    assert_eq!(result.loops.len(), 2);
    assert!(result.loops[0].efficiency() > result.loops[1].efficiency());
    assert!(result.loops[0].involves(&WalletId::new("A")));
}

#[test]
fn stream_carries_paths_and_status() {
    let session = three_way(EngineConfig::default());
    let rx = session.hub().subscribe();
    session.discover(&DiscoveryQuery::all()).unwrap();

    let messages: Vec<StreamMessage> = rx.try_iter().collect();
    let statuses: Vec<WireStatus> = messages
        .iter()
        .filter_map(|m| match m {
            StreamMessage::Status { status } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.first(), Some(&WireStatus::Building));
    assert_eq!(statuses.last(), Some(&WireStatus::Ready));

    let paths = messages
        .iter()
        .find_map(|m| match m {
            StreamMessage::TradePaths { paths, .. } => Some(paths.len()),
            _ => None,
        })
        .unwrap();
    assert_eq!(paths, 1);

    let json = messages[0].to_json().unwrap();
    assert!(json.contains(r#""type":"status""#));
}

#[test]
fn pool_input_json_drives_engine() {
    let pool: PoolInput = serde_json::from_str(
        r#"{
            "items": [
                {"id": "mint-a", "value": 12.5, "liquidity": 0.9},
                {"id": "mint-b", "value": 12.0, "liquidity": 0.7}
            ],
            "preferences": [
                {"walletAddress": "alice", "ownedItemOrItems": "mint-a", "wantedItemOrItems": "mint-b"},
                {"walletAddress": "bob", "ownedItemOrItems": ["mint-b"], "wantedItemOrItems": ["mint-a"]}
            ]
        }"#,
    )
    .unwrap();

    let engine = TradeLoopEngine::new(EngineConfig::default(), Arc::new(pool.valuation_table().unwrap())).unwrap();
    for input in pool.preferences {
        engine.submit_preference(input).unwrap();
    }
    let result = engine.discover(&DiscoveryQuery::all()).unwrap();
    assert_eq!(result.loops.len(), 1);

    let json = serde_json::to_value(&result.loops[0]).unwrap();
    assert_eq!(json["totalParticipants"], 2);
    assert!(json["efficiency"].as_f64().unwrap() > 0.0);
}

#[test]
fn generated_pool_end_to_end() {
    let pool = generate_pool(&PoolConfig {
        wallet_count: 40,
        wants_per_wallet: 4,
        seed: Some(11),
        ..Default::default()
    });
    let mut config = EngineConfig::default();
    config.balancer.tolerance = Decimal::ONE;
    config.discovery.max_cycle_length = 4;
    let store = Arc::new(PreferenceStore::new());
    pool.load_into(&store).unwrap();
    let session = DiscoverySession::new(store.clone(), Arc::new(pool.valuation_table()), config).unwrap();

    let result = session.discover(&DiscoveryQuery::all()).unwrap();
    for trade in &result.loops {
        assert!(trade.verify());
        assert!(trade.total_participants() <= 4);
        assert_eq!(trade.adjustment_total(), Decimal::ZERO);
        assert!(trade.efficiency() >= Decimal::ZERO && trade.efficiency() <= dec!(100));
    }
    for pair in result.loops.windows(2) {
        assert!(pair[0].efficiency() >= pair[1].efficiency());
    }

    // every loop is built from cycles the raw search also finds
    let graph = WantGraph::build(&store.snapshot(), &pool.valuation_table());
    let guard = SearchGuard::new(SearchBudget::unbounded());
    let search = find_cycles(&graph, 4, &guard);
    assert_eq!(search.cycles.len(), result.stats.cycles_found);
}
