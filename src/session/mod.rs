//! Discovery passes over the live store.
//!
//! A [`DiscoverySession`] turns the current store snapshot into a ranked
//! set of trade loops. Passes run one at a time; every pass is tagged with
//! the store version it read and is thrown away if that version moves
//! before it publishes.

pub mod result;
pub mod stream;
pub mod worker;

use crate::config::EngineConfig;
use crate::core::item::ValuationProvider;
use crate::core::store::PreferenceStore;
use crate::core::trade_loop::TradeLoop;
use crate::error::{ConfigError, DiscoveryError, PassFailure, RejectionReason};
use crate::graph::cycle_detection::{CycleEnumerator, SearchGuard, SearchOutcome};
use crate::graph::want_graph::WantGraph;
use crate::optimization::balancer::{BalanceOutcome, ValueBalancer};
use crate::optimization::efficiency::EfficiencyScorer;
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use self::result::{rank_order, DiscoveryQuery, DiscoveryResult, HistoryEntry, PassStats};
use self::stream::{StreamHub, StreamMessage, StreamSink};

/// Where a session is in its pass lifecycle.
///
/// `Idle -> Building -> Searching -> Balancing -> Ready | Failed`, and back
/// to `Idle` once the store changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Building,
    Searching,
    Balancing,
    Ready,
    Failed(PassFailure),
}

impl SessionStatus {
    /// The coarser status reported to stream consumers.
    pub fn wire(&self) -> WireStatus {
        match self {
            SessionStatus::Idle => WireStatus::Idle,
            SessionStatus::Building => WireStatus::Building,
            SessionStatus::Searching | SessionStatus::Balancing => WireStatus::Searching,
            SessionStatus::Ready => WireStatus::Ready,
            SessionStatus::Failed(_) => WireStatus::Error,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionStatus::Building | SessionStatus::Searching | SessionStatus::Balancing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    Idle,
    Building,
    Searching,
    Ready,
    Error,
}

/// Counters over the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub passes_completed: u64,
    pub passes_failed: u64,
    pub cache_hits: u64,
}

/// Runs discovery passes and publishes their results.
///
/// Everything a pass computes is derived from one immutable snapshot and
/// the valuations captured when its graph was built. The store may change
/// at any time; the pass notices through its abort check and ends in
/// `Failed(StaleSnapshot)` instead of publishing loops built on data that
/// no longer holds.
pub struct DiscoverySession {
    store: Arc<PreferenceStore>,
    valuations: Arc<dyn ValuationProvider>,
    config: EngineConfig,
    balancer: ValueBalancer,
    scorer: EfficiencyScorer,
    status: RwLock<SessionStatus>,
    pass_lock: Mutex<()>,
    results: Mutex<HashMap<DiscoveryQuery, Arc<DiscoveryResult>>>,
    cancel_requested: AtomicBool,
    hub: StreamHub,
    history: Mutex<VecDeque<HistoryEntry>>,
    passes_completed: AtomicU64,
    passes_failed: AtomicU64,
    cache_hits: AtomicU64,
}

impl DiscoverySession {
    /// Fails if `config` does not pass [`EngineConfig::validate`].
    pub fn new(
        store: Arc<PreferenceStore>,
        valuations: Arc<dyn ValuationProvider>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            balancer: ValueBalancer::from_config(&config.balancer),
            scorer: EfficiencyScorer::new(config.scoring, config.discovery.max_cycle_length),
            store,
            valuations,
            config,
            status: RwLock::new(SessionStatus::Idle),
            pass_lock: Mutex::new(()),
            results: Mutex::new(HashMap::new()),
            cancel_requested: AtomicBool::new(false),
            hub: StreamHub::new(),
            history: Mutex::new(VecDeque::new()),
            passes_completed: AtomicU64::new(0),
            passes_failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        })
    }

    // --- Accessors ---

    pub fn store(&self) -> &Arc<PreferenceStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn hub(&self) -> &StreamHub {
        &self.hub
    }

    pub fn add_sink(&self, sink: Arc<dyn StreamSink>) {
        self.hub.add_sink(sink);
    }

    /// Most recent completed passes, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// The published result for `query`, if it still matches the store and
    /// the valuations.
    pub fn current(&self, query: &DiscoveryQuery) -> Option<Arc<DiscoveryResult>> {
        let version = self.store.version();
        let valuation_version = self.valuations.version();
        self.results
            .lock()
            .get(query)
            .filter(|result| {
                result.store_version == version && result.valuation_version == valuation_version
            })
            .cloned()
    }

    /// The last published result for `query`, current or not.
    pub fn latest(&self, query: &DiscoveryQuery) -> Option<Arc<DiscoveryResult>> {
        self.results.lock().get(query).cloned()
    }

    /// Abort the pass in flight, if any. It ends in `Failed(Cancelled)`.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Note that the store changed. A finished session returns to `Idle`.
    pub fn invalidate(&self) {
        let changed = {
            let mut status = self.status.write();
            if matches!(*status, SessionStatus::Ready | SessionStatus::Failed(_)) {
                *status = SessionStatus::Idle;
                true
            } else {
                false
            }
        };
        if changed {
            self.hub.publish(StreamMessage::Status {
                status: WireStatus::Idle,
            });
        }
    }

    /// Current result for `query`, running passes until one publishes.
    ///
    /// Callers are serialized. One that waited behind another pass gets
    /// that pass's result when it answers the same query at the current
    /// store version. Stale passes are retried up to `max_stale_retries`
    /// times; a cancelled pass is not retried.
    pub fn discover(&self, query: &DiscoveryQuery) -> Result<Arc<DiscoveryResult>, DiscoveryError> {
        let _pass = self.pass_lock.lock();
        let attempts = self.config.discovery.max_stale_retries + 1;
        let mut last = None;
        for attempt in 1..=attempts {
            if let Some(result) = self.current(query) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!("reusing pass {} for version {}", result.pass_id, result.store_version);
                return Ok(result);
            }
            match self.execute(query) {
                Ok(result) => return Ok(result),
                Err(failure @ PassFailure::StaleSnapshot { .. }) => {
                    debug!("pass attempt {}/{} went stale", attempt, attempts);
                    last = Some(failure);
                }
                Err(failure) => return Err(failure.into()),
            }
        }
        let last = last.unwrap_or(PassFailure::Cancelled);
        warn!("giving up after {} stale passes: {}", attempts, last);
        Err(DiscoveryError::RetriesExhausted { attempts, last })
    }

    /// Run exactly one pass, ignoring any cached result.
    pub fn run_pass(&self, query: &DiscoveryQuery) -> Result<Arc<DiscoveryResult>, PassFailure> {
        let _pass = self.pass_lock.lock();
        self.execute(query)
    }

    fn execute(&self, query: &DiscoveryQuery) -> Result<Arc<DiscoveryResult>, PassFailure> {
        self.cancel_requested.store(false, Ordering::Release);
        let started_at = Utc::now();
        let timer = Instant::now();
        let pass_id = Uuid::new_v4();
        let settings = &self.config.discovery;

        self.set_status(SessionStatus::Building);
        let snapshot = self.store.snapshot();
        let version = snapshot.version();
        let valuation_version = self.valuations.version();
        let pool_state = snapshot.pool_state();
        let graph = WantGraph::build(&snapshot, self.valuations.as_ref());
        debug!(
            "pass {} building on version {}: {} wallets, {} edges",
            pass_id,
            version,
            graph.wallet_count(),
            graph.edge_count()
        );

        let abort = || {
            self.cancel_requested.load(Ordering::Acquire) || self.store.version() != version
        };

        self.set_status(SessionStatus::Searching);
        let guard = SearchGuard::new(settings.search_budget()).with_abort(&abort);
        let mut enumerator = CycleEnumerator::new(&graph, settings.max_cycle_length);
        if let Some(wallet) = &query.focus {
            enumerator = enumerator.focus(wallet.clone());
        }
        let search = if settings.parallel {
            enumerator.collect_parallel(&guard)
        } else {
            enumerator.collect(&guard)
        };
        if search.outcome == SearchOutcome::Cancelled {
            return Err(self.fail(pass_id, version, started_at));
        }

        let mut stats = PassStats {
            cycles_found: search.cycles.len(),
            explored_paths: search.explored_paths,
            search_ms: timer.elapsed().as_millis() as u64,
            ..PassStats::default()
        };

        self.set_status(SessionStatus::Balancing);
        let ttl = settings.loop_ttl();
        let mut loops: Vec<TradeLoop> = Vec::new();
        for cycle in &search.cycles {
            if abort() {
                return Err(self.fail(pass_id, version, started_at));
            }
            let candidate = graph.candidate_loop(cycle, settings.max_items_per_step);
            match self.balancer.balance(&candidate, &graph) {
                BalanceOutcome::Balanced(balanced) => {
                    stats.loops_balanced += 1;
                    let score = self.scorer.score(&balanced, &graph);
                    let (steps, participants, total_value) = balanced.into_parts();
                    let trade = TradeLoop::new(steps, participants, score.total, total_value, started_at, ttl);
                    if query.matches(&trade) {
                        loops.push(trade);
                    } else {
                        stats.filtered_out += 1;
                    }
                }
                BalanceOutcome::Rejected(RejectionReason::ImbalanceExceedsTolerance { .. }) => {
                    stats.rejected_imbalance += 1;
                }
                BalanceOutcome::Rejected(RejectionReason::ZeroValueParticipant { .. }) => {
                    stats.rejected_zero_value += 1;
                }
                BalanceOutcome::Rejected(RejectionReason::ValueOverflow { .. }) => {
                    stats.rejected_overflow += 1;
                }
            }
        }

        loops.sort_by(rank_order);
        loops.truncate(settings.max_results);

        stats.total_ms = timer.elapsed().as_millis() as u64;
        let result = Arc::new(DiscoveryResult {
            pass_id,
            store_version: version,
            valuation_version,
            query: query.clone(),
            loops,
            pool_state,
            partial: search.outcome == SearchOutcome::BudgetExceeded,
            search_outcome: search.outcome,
            stats,
            started_at,
            completed_at: Utc::now(),
        });
        self.publish(&result)?;
        Ok(result)
    }

    /// Cache and stream `result`, unless the store moved or a cancel arrived
    /// since the pass read its snapshot.
    fn publish(&self, result: &Arc<DiscoveryResult>) -> Result<(), PassFailure> {
        {
            let mut results = self.results.lock();
            if self.cancel_requested.load(Ordering::Acquire) || self.store.version() != result.store_version {
                drop(results);
                return Err(self.fail(result.pass_id, result.store_version, result.started_at));
            }
            results.retain(|_, cached| {
                cached.store_version == result.store_version
                    && cached.valuation_version == result.valuation_version
            });
            results.insert(result.query.clone(), result.clone());
        }
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
        self.record(result.history_entry());
        info!(
            "pass {} published {} loops for version {} ({} cycles, {} rejected{})",
            result.pass_id,
            result.loops.len(),
            result.store_version,
            result.stats.cycles_found,
            result.stats.rejected(),
            if result.partial { ", partial" } else { "" }
        );

        self.hub.publish(StreamMessage::TradePaths {
            paths: result.loops.clone(),
            pool_state: result.pool_state,
            store_version: result.store_version,
        });
        self.hub.publish(StreamMessage::Metrics {
            metrics: result.metrics(),
        });
        self.set_status(SessionStatus::Ready);
        Ok(())
    }

    /// End the pass in `Failed`, classifying why it stopped.
    fn fail(&self, pass_id: Uuid, version: u64, started_at: chrono::DateTime<Utc>) -> PassFailure {
        let current_version = self.store.version();
        let failure = if self.cancel_requested.load(Ordering::Acquire) {
            PassFailure::Cancelled
        } else {
            PassFailure::StaleSnapshot {
                pass_version: version,
                current_version,
            }
        };
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
        debug!("pass {} failed: {}", pass_id, failure);
        self.record(HistoryEntry {
            pass_id,
            store_version: version,
            status: WireStatus::Error,
            loops: 0,
            partial: false,
            failure: Some(failure.clone()),
            started_at,
            completed_at: Utc::now(),
        });
        self.set_status(SessionStatus::Failed(failure.clone()));
        failure
    }

    fn record(&self, entry: HistoryEntry) {
        let limit = self.config.session.history_limit;
        if limit > 0 {
            let mut history = self.history.lock();
            history.push_back(entry.clone());
            while history.len() > limit {
                history.pop_front();
            }
        }
        self.hub.publish(StreamMessage::History { entry });
    }

    fn set_status(&self, next: SessionStatus) {
        let wire = next.wire();
        *self.status.write() = next;
        self.hub.publish(StreamMessage::Status { status: wire });
    }
}

impl std::fmt::Debug for DiscoverySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoverySession")
            .field("status", &self.status())
            .field("store_version", &self.store.version())
            .field("metrics", &self.metrics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::{ItemId, ValuationTable};
    use crate::core::preference::WalletPreference;
    use crate::core::wallet::WalletId;
    use rust_decimal_macros::dec;

    fn session_with(prefs: &[(&str, &[&str], &[&str])]) -> DiscoverySession {
        let store = Arc::new(PreferenceStore::new());
        let table = ValuationTable::new();
        for (wallet, owned, wanted) in prefs {
            store
                .upsert_preference(
                    WalletPreference::new(*wallet, owned.iter().copied(), wanted.iter().copied())
                        .unwrap(),
                )
                .unwrap();
            for item in owned.iter() {
                table.set(ItemId::new(*item), dec!(100), dec!(0.8)).unwrap();
            }
        }
        DiscoverySession::new(store, Arc::new(table), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_pass_publishes_ready() {
        let session = session_with(&[("A", &["x"], &["y"]), ("B", &["y"], &["x"])]);
        let result = session.discover(&DiscoveryQuery::all()).unwrap();
        assert_eq!(result.loops.len(), 1);
        assert_eq!(result.store_version, 2);
        assert_eq!(result.pool_state.wallet_count, 2);
        assert!(!result.partial);
        assert_eq!(session.status(), SessionStatus::Ready);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_same_version_reuses_result() {
        let session = session_with(&[("A", &["x"], &["y"]), ("B", &["y"], &["x"])]);
        let first = session.discover(&DiscoveryQuery::all()).unwrap();
        let second = session.discover(&DiscoveryQuery::all()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(session.metrics().cache_hits, 1);
        assert_eq!(session.metrics().passes_completed, 1);
    }

    #[test]
    fn test_mutation_invalidates_cache() {
        let session = session_with(&[("A", &["x"], &["y"]), ("B", &["y"], &["x"])]);
        let first = session.discover(&DiscoveryQuery::all()).unwrap();
        session.store().remove_wallet(&WalletId::new("B"));
        session.invalidate();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.current(&DiscoveryQuery::all()).is_none());

        let second = session.discover(&DiscoveryQuery::all()).unwrap();
        assert_ne!(first.pass_id, second.pass_id);
        assert!(second.loops.is_empty());
    }

    #[test]
    fn test_focus_query_filters_items() {
        let session = session_with(&[
            ("A", &["x"], &["y"]),
            ("B", &["y"], &["x"]),
            ("C", &["p"], &["q"]),
            ("D", &["q"], &["p"]),
        ]);
        let all = session.discover(&DiscoveryQuery::all()).unwrap();
        assert_eq!(all.loops.len(), 2);

        let focused = session.discover(&DiscoveryQuery::for_wallet("C")).unwrap();
        assert_eq!(focused.loops.len(), 1);
        assert!(focused.loops[0].involves(&WalletId::new("D")));

        let wrong_item = session
            .discover(&DiscoveryQuery::for_wallet("C").giving("x"))
            .unwrap();
        assert!(wrong_item.loops.is_empty());
        assert_eq!(wrong_item.stats.filtered_out, 1);
    }

    #[test]
    fn test_cancel_from_sink_fails_pass() {
        let session = Arc::new(session_with(&[("A", &["x"], &["y"]), ("B", &["y"], &["x"])]));
        let weak = Arc::downgrade(&session);
        session.add_sink(Arc::new(move |message: &StreamMessage| {
            if let StreamMessage::Status {
                status: WireStatus::Searching,
            } = message
            {
                if let Some(session) = weak.upgrade() {
                    session.cancel();
                }
            }
        }));

        let err = session.discover(&DiscoveryQuery::all()).unwrap_err();
        assert_eq!(err, DiscoveryError::Aborted(PassFailure::Cancelled));
        assert_eq!(session.status(), SessionStatus::Failed(PassFailure::Cancelled));
        assert_eq!(session.metrics().passes_failed, 1);
    }

    #[test]
    fn test_status_wire_mapping() {
        assert_eq!(SessionStatus::Balancing.wire(), WireStatus::Searching);
        assert_eq!(
            SessionStatus::Failed(PassFailure::Cancelled).wire(),
            WireStatus::Error
        );
        assert_eq!(serde_json::to_value(WireStatus::Ready).unwrap(), "ready");
    }

    #[test]
    fn test_history_is_bounded() {
        let store = Arc::new(PreferenceStore::new());
        let mut config = EngineConfig::default();
        config.session.history_limit = 2;
        let session = DiscoverySession::new(store, Arc::new(ValuationTable::new()), config).unwrap();
        for _ in 0..4 {
            session.run_pass(&DiscoveryQuery::all()).unwrap();
        }
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.metrics().passes_completed, 4);
    }

    #[test]
    fn test_valuation_change_invalidates_cache() {
        let store = Arc::new(PreferenceStore::new());
        store
            .upsert_preference(WalletPreference::new("A", ["x"], ["y"]).unwrap())
            .unwrap();
        store
            .upsert_preference(WalletPreference::new("B", ["y"], ["x"]).unwrap())
            .unwrap();
        let table = Arc::new(ValuationTable::new());
        table.set(ItemId::new("x"), dec!(100), dec!(1)).unwrap();
        table.set(ItemId::new("y"), dec!(100), dec!(1)).unwrap();
        let session = DiscoverySession::new(store, table.clone(), EngineConfig::default()).unwrap();

        let first = session.discover(&DiscoveryQuery::all()).unwrap();
        assert_eq!(first.loops.len(), 1);

        table.set(ItemId::new("y"), dec!(1), dec!(1)).unwrap();
        assert!(session.current(&DiscoveryQuery::all()).is_none());

        let second = session.discover(&DiscoveryQuery::all()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.store_version, first.store_version);
        assert!(second.loops.is_empty());
        assert_eq!(second.stats.rejected_imbalance, 1);
        assert_eq!(session.metrics().cache_hits, 0);
    }

    #[test]
    fn test_store_moving_before_publish_discards_result() {
        // no cycles, so nothing between the balancing status and publishing checks the store
        let session = session_with(&[("A", &["x"], &["z"])]);
        let store = session.store().clone();
        let searching = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = searching.clone();
        session.add_sink(Arc::new(move |message: &StreamMessage| {
            if let StreamMessage::Status {
                status: WireStatus::Searching,
            } = message
            {
                // the second one announces balancing
                if seen.fetch_add(1, Ordering::SeqCst) == 1 {
                    store
                        .upsert_preference(WalletPreference::new("B", ["y"], ["x"]).unwrap())
                        .unwrap();
                }
            }
        }));
        let stream = session.hub().subscribe();

        let err = session.run_pass(&DiscoveryQuery::all()).unwrap_err();
        assert_eq!(
            err,
            PassFailure::StaleSnapshot {
                pass_version: 1,
                current_version: 2
            }
        );
        assert_eq!(searching.load(Ordering::SeqCst), 2);
        assert!(session.latest(&DiscoveryQuery::all()).is_none());
        assert!(stream
            .try_iter()
            .all(|m| !matches!(m, StreamMessage::TradePaths { .. } | StreamMessage::Metrics { .. })));
        assert_eq!(session.metrics().passes_completed, 0);
        assert_eq!(session.metrics().passes_failed, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.discovery.max_cycle_length = 40;
        let result = DiscoverySession::new(
            Arc::new(PreferenceStore::new()),
            Arc::new(ValuationTable::new()),
            config,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "discovery.max_cycle_length",
                ..
            })
        ));

        let mut config = EngineConfig::default();
        config.balancer.tolerance = dec!(2);
        assert!(DiscoverySession::new(
            Arc::new(PreferenceStore::new()),
            Arc::new(ValuationTable::new()),
            config,
        )
        .is_err());
    }
}
