use crate::api::{DiscoveryRequest, DiscoveryResponse, PreferenceInput};
use crate::config::EngineConfig;
use crate::core::item::{ItemId, ValuationProvider};
use crate::core::pool::PoolState;
use crate::core::preference::WalletPreference;
use crate::core::store::PreferenceStore;
use crate::core::wallet::WalletId;
use crate::error::{ConfigError, DiscoveryError, ValidationError};
use crate::session::result::{DiscoveryQuery, DiscoveryResult};
use crate::session::stream::{StreamMessage, StreamSink};
use crate::session::worker::DiscoveryWorker;
use crate::session::DiscoverySession;
use chrono::Utc;
use crossbeam_channel::Receiver;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Entry point wiring the store, a discovery session and, optionally, a
/// background worker that re-runs discovery as declarations change.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::api::{DiscoveryRequest, PreferenceInput, OneOrMany};
/// use tradeloop_engine::config::EngineConfig;
/// use tradeloop_engine::engine::TradeLoopEngine;
/// use tradeloop_engine::prelude::*;
/// use rust_decimal_macros::dec;
/// use std::sync::Arc;
///
/// let values: ValuationTable = [
///     (ItemId::new("x"), Valuation::new(dec!(10), dec!(1))),
///     (ItemId::new("y"), Valuation::new(dec!(10), dec!(1))),
/// ]
/// .into_iter()
/// .collect();
/// let engine = TradeLoopEngine::new(EngineConfig::default(), Arc::new(values)).unwrap();
///
/// engine.submit_preference(PreferenceInput {
///     wallet_address: "bob".into(),
///     owned_item_or_items: OneOrMany::One("y".into()),
///     wanted_item_or_items: OneOrMany::One("x".into()),
///     expires_at: None,
/// }).unwrap();
///
/// let response = engine.handle_discovery_request(&DiscoveryRequest {
///     wallet_address: "alice".into(),
///     has_item: Some("x".into()),
///     wants_item: Some("y".into()),
/// });
/// assert!(response.success);
/// assert_eq!(response.trades.len(), 1);
/// ```
pub struct TradeLoopEngine {
    store: Arc<PreferenceStore>,
    session: Arc<DiscoverySession>,
    worker: Option<DiscoveryWorker>,
    pending_mutations: AtomicU64,
    mutation_threshold: u64,
}

impl TradeLoopEngine {
    /// An engine without a background worker; discovery runs on request.
    pub fn new(config: EngineConfig, valuations: Arc<dyn ValuationProvider>) -> Result<Self, ConfigError> {
        let store = Arc::new(PreferenceStore::new());
        let mutation_threshold = config.trigger.mutation_threshold;
        let session = Arc::new(DiscoverySession::new(store.clone(), valuations, config)?);
        Ok(Self {
            store,
            session,
            worker: None,
            pending_mutations: AtomicU64::new(0),
            mutation_threshold,
        })
    }

    /// Start a worker that runs a pass every `mutation_threshold` mutations.
    pub fn with_background_worker(mut self) -> std::io::Result<Self> {
        self.worker = Some(DiscoveryWorker::spawn(self.session.clone())?);
        Ok(self)
    }

    // --- Accessors ---

    pub fn store(&self) -> &Arc<PreferenceStore> {
        &self.store
    }

    pub fn session(&self) -> &Arc<DiscoverySession> {
        &self.session
    }

    pub fn pool_state(&self) -> PoolState {
        self.store.pool_state()
    }

    pub fn subscribe(&self) -> Receiver<StreamMessage> {
        self.session.hub().subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn StreamSink>) {
        self.session.add_sink(sink);
    }

    // --- Mutations ---

    pub fn submit_preference(&self, input: PreferenceInput) -> Result<u64, ValidationError> {
        self.upsert_preference(input.into_preference()?)
    }

    pub fn upsert_preference(&self, preference: WalletPreference) -> Result<u64, ValidationError> {
        let version = self.store.upsert_preference(preference)?;
        self.on_mutation();
        Ok(version)
    }

    pub fn remove_wallet(&self, wallet: &WalletId) -> Option<u64> {
        let version = self.store.remove_wallet(wallet)?;
        self.on_mutation();
        Some(version)
    }

    pub fn withdraw_items(&self, wallet: &WalletId, owned: &[ItemId], wanted: &[ItemId]) -> Option<u64> {
        let version = self.store.withdraw_items(wallet, owned, wanted)?;
        self.on_mutation();
        Some(version)
    }

    /// Remove expired declarations; returns how many wallets were dropped.
    pub fn purge_expired(&self) -> usize {
        let purged = self.store.purge_expired(Utc::now());
        if purged > 0 {
            self.on_mutation();
        }
        purged
    }

    fn on_mutation(&self) {
        self.session.invalidate();
        let pending = self.pending_mutations.fetch_add(1, Ordering::AcqRel) + 1;
        if pending < self.mutation_threshold {
            return;
        }
        self.pending_mutations.store(0, Ordering::Release);
        if let Some(worker) = &self.worker {
            debug!("{} mutations since last trigger, scheduling pass", pending);
            worker.trigger();
        }
    }

    // --- Discovery ---

    pub fn discover(&self, query: &DiscoveryQuery) -> Result<Arc<DiscoveryResult>, DiscoveryError> {
        self.purge_expired();
        self.session.discover(query)
    }

    /// Answer a discovery request from the transport layer.
    ///
    /// The request's `hasItem` and `wantsItem` are first merged into the
    /// wallet's declarations. Repeating an identical request does not
    /// change the store, so it is answered from the cached result.
    pub fn handle_discovery_request(&self, request: &DiscoveryRequest) -> DiscoveryResponse {
        if let Err(e) = self.merge_request(request) {
            return DiscoveryResponse::failure(e, self.pool_state());
        }
        match self.discover(&request.query()) {
            Ok(result) => DiscoveryResponse::from_result(&result),
            Err(e) => DiscoveryResponse::failure(e, self.pool_state()),
        }
    }

    fn merge_request(&self, request: &DiscoveryRequest) -> Result<(), ValidationError> {
        let wallet = WalletId::new(request.wallet_address.as_str());
        if wallet.is_empty() {
            return Err(ValidationError::EmptyWalletId);
        }
        let owned: Vec<ItemId> = request.has_item.iter().map(|i| ItemId::new(i.as_str())).collect();
        let wanted: Vec<ItemId> = request.wants_item.iter().map(|i| ItemId::new(i.as_str())).collect();
        if owned.is_empty() && wanted.is_empty() {
            return Ok(());
        }

        let merged = match self.store.get(&wallet) {
            Some(current) => {
                let merged = current.merged(owned, wanted)?;
                if merged == current {
                    return Ok(());
                }
                merged
            }
            None => WalletPreference::new(wallet, owned, wanted)?,
        };
        self.upsert_preference(merged).map(|_| ())
    }

    /// Stop the background worker, letting a queued pass finish.
    pub fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl std::fmt::Debug for TradeLoopEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeLoopEngine")
            .field("store_version", &self.store.version())
            .field("session", &self.session)
            .field("background", &self.worker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::OneOrMany;
    use crate::core::item::{Valuation, ValuationTable};
    use crate::session::SessionStatus;
    use rust_decimal_macros::dec;

    fn engine() -> TradeLoopEngine {
        let values: ValuationTable = ["x", "y", "z"]
            .into_iter()
            .map(|id| (ItemId::new(id), Valuation::new(dec!(50), dec!(0.9))))
            .collect();
        TradeLoopEngine::new(EngineConfig::default(), Arc::new(values)).unwrap()
    }

    fn input(wallet: &str, owned: &str, wanted: &str) -> PreferenceInput {
        PreferenceInput {
            wallet_address: wallet.into(),
            owned_item_or_items: OneOrMany::One(owned.into()),
            wanted_item_or_items: OneOrMany::One(wanted.into()),
            expires_at: None,
        }
    }

    #[test]
    fn test_request_merges_declarations() {
        let engine = engine();
        engine.submit_preference(input("bob", "y", "x")).unwrap();
        let response = engine.handle_discovery_request(&DiscoveryRequest {
            wallet_address: "alice".into(),
            has_item: Some("x".into()),
            wants_item: Some("y".into()),
        });
        assert!(response.success);
        assert_eq!(response.trades.len(), 1);
        assert_eq!(response.pool_state.wallet_count, 2);
        assert!(engine.store().get(&WalletId::new("alice")).is_some());
    }

    #[test]
    fn test_repeated_request_is_idempotent() {
        let engine = engine();
        engine.submit_preference(input("bob", "y", "x")).unwrap();
        let request = DiscoveryRequest {
            wallet_address: "alice".into(),
            has_item: Some("x".into()),
            wants_item: Some("y".into()),
        };
        let first = engine.handle_discovery_request(&request);
        let version = engine.store().version();
        let second = engine.handle_discovery_request(&request);
        assert_eq!(engine.store().version(), version);
        assert_eq!(first, second);
    }

    #[test]
    fn test_conflicting_request_fails_cleanly() {
        let engine = engine();
        engine.submit_preference(input("bob", "y", "x")).unwrap();
        // alice cannot claim bob's item
        let response = engine.handle_discovery_request(&DiscoveryRequest {
            wallet_address: "alice".into(),
            has_item: Some("y".into()),
            wants_item: None,
        });
        assert!(!response.success);
        assert!(response.error.unwrap().contains("already owned"));
        assert_eq!(response.pool_state.wallet_count, 1);
    }

    #[test]
    fn test_mutation_returns_session_to_idle() {
        let engine = engine();
        engine.submit_preference(input("bob", "y", "x")).unwrap();
        engine.discover(&DiscoveryQuery::all()).unwrap();
        assert_eq!(engine.session().status(), SessionStatus::Ready);
        engine.remove_wallet(&WalletId::new("bob"));
        assert_eq!(engine.session().status(), SessionStatus::Idle);
    }

    #[test]
    fn test_background_worker_debounces() {
        let values = Arc::new(ValuationTable::new());
        let mut config = EngineConfig::default();
        config.trigger.mutation_threshold = 3;
        let engine = TradeLoopEngine::new(config, values)
            .unwrap()
            .with_background_worker()
            .unwrap();
        let session = engine.session().clone();

        for i in 0..6 {
            engine
                .submit_preference(input(&format!("w{}", i), &format!("own{}", i), &format!("want{}", i)))
                .unwrap();
        }
        engine.shutdown();

        let latest = session.latest(&DiscoveryQuery::all()).unwrap();
        assert_eq!(latest.store_version, 6);
        assert_eq!(latest.pool_state.wallet_count, 6);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.trigger.mutation_threshold = 0;
        let result = TradeLoopEngine::new(config, Arc::new(ValuationTable::new()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "trigger.mutation_threshold",
                ..
            })
        ));
    }
}
