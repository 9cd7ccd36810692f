use crate::core::item::ItemId;
use crate::core::pool::PoolState;
use crate::core::preference::WalletPreference;
use crate::core::wallet::WalletId;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Preferences = BTreeMap<WalletId, WalletPreference>;

#[derive(Debug, Default)]
struct StoreState {
    /// Shared with snapshots; copied on write while a snapshot is alive.
    preferences: Arc<Preferences>,
    /// item -> declaring owner
    owners: HashMap<ItemId, WalletId>,
}

impl StoreState {
    fn check_ownership(&self, preference: &WalletPreference) -> Result<(), ValidationError> {
        for item in preference.owned() {
            if let Some(owner) = self.owners.get(item) {
                if owner != preference.wallet() {
                    return Err(ValidationError::OwnershipConflict {
                        item: item.clone(),
                        owner: owner.clone(),
                        claimant: preference.wallet().clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn remove(&mut self, wallet: &WalletId) -> Option<WalletPreference> {
        if !self.preferences.contains_key(wallet) {
            return None;
        }
        let previous = Arc::make_mut(&mut self.preferences).remove(wallet)?;
        for item in previous.owned() {
            self.owners.remove(item);
        }
        Some(previous)
    }

    /// Replace a wallet's declarations. Ownership must already be checked.
    fn apply(&mut self, preference: WalletPreference) {
        let wallet = preference.wallet().clone();
        self.remove(&wallet);
        if preference.is_empty() {
            return;
        }
        for item in preference.owned() {
            self.owners.insert(item.clone(), wallet.clone());
        }
        Arc::make_mut(&mut self.preferences).insert(wallet, preference);
    }
}

/// Immutable view of the store at one version.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    version: u64,
    preferences: Arc<Preferences>,
}

impl StoreSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn preferences(&self) -> impl Iterator<Item = &WalletPreference> {
        self.preferences.values()
    }

    pub fn get(&self, wallet: &WalletId) -> Option<&WalletPreference> {
        self.preferences.get(wallet)
    }

    pub fn wallet_count(&self) -> usize {
        self.preferences.len()
    }

    pub fn pool_state(&self) -> PoolState {
        PoolState::from_preferences(self.preferences())
    }
}

/// The single source of truth for declared wants and haves.
///
/// Writers are serialized by a lock and every successful mutation bumps a
/// monotonically increasing version. Readers take cheap snapshots (the
/// preference map is reference-counted and copied on write), so a running
/// discovery pass never blocks writers; it only compares versions to find
/// out whether its snapshot was superseded.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::core::preference::WalletPreference;
/// use tradeloop_engine::core::store::PreferenceStore;
///
/// let store = PreferenceStore::new();
/// let v1 = store
///     .upsert_preference(WalletPreference::new("alice", ["x"], ["y"]).unwrap())
///     .unwrap();
/// let conflict = store.upsert_preference(WalletPreference::new("bob", ["x"], ["z"]).unwrap());
///
/// assert!(conflict.is_err());
/// assert_eq!(store.version(), v1);
/// ```
#[derive(Debug, Default)]
pub struct PreferenceStore {
    state: RwLock<StoreState>,
    version: AtomicU64,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current store version. Lock-free.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Must be called with the write lock held so versions follow lock order.
    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Replace a wallet's declared owned and wanted sets.
    ///
    /// A preference with both sets empty removes the wallet. Returns the new
    /// store version.
    pub fn upsert_preference(&self, preference: WalletPreference) -> Result<u64, ValidationError> {
        let mut state = self.state.write();
        state.check_ownership(&preference)?;
        debug!(
            "upsert {}: {} owned, {} wanted",
            preference.wallet(),
            preference.owned().len(),
            preference.wanted().len()
        );
        state.apply(preference);
        Ok(self.bump())
    }

    /// Clear all declarations of a wallet. Returns `None` if it was unknown.
    pub fn remove_wallet(&self, wallet: &WalletId) -> Option<u64> {
        let mut state = self.state.write();
        state.remove(wallet)?;
        debug!("removed wallet {}", wallet);
        Some(self.bump())
    }

    /// Withdraw some declarations of a wallet, keeping the rest.
    ///
    /// Returns `None` when the wallet is unknown or nothing changed.
    pub fn withdraw_items(
        &self,
        wallet: &WalletId,
        owned: &[ItemId],
        wanted: &[ItemId],
    ) -> Option<u64> {
        let mut state = self.state.write();
        let current = state.preferences.get(wallet)?;
        let reduced = current.without(owned, wanted);
        if &reduced == current {
            return None;
        }
        state.apply(reduced);
        Some(self.bump())
    }

    /// Drop every declaration whose expiry has passed.
    ///
    /// Returns the number of wallets removed; the version is bumped once if
    /// anything was purged.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write();
        let expired: Vec<WalletId> = state
            .preferences
            .values()
            .filter(|p| p.is_expired(now))
            .map(|p| p.wallet().clone())
            .collect();
        for wallet in &expired {
            state.remove(wallet);
        }
        if !expired.is_empty() {
            let version = self.bump();
            info!("purged {} expired preferences (version {})", expired.len(), version);
        }
        expired.len()
    }

    /// Take an immutable snapshot tagged with the version it reflects.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            version: self.version(),
            preferences: Arc::clone(&state.preferences),
        }
    }

    pub fn get(&self, wallet: &WalletId) -> Option<WalletPreference> {
        self.state.read().preferences.get(wallet).cloned()
    }

    /// The wallet currently declaring ownership of an item.
    pub fn owner_of(&self, item: &ItemId) -> Option<WalletId> {
        self.state.read().owners.get(item).cloned()
    }

    pub fn pool_state(&self) -> PoolState {
        PoolState::from_preferences(self.state.read().preferences.values())
    }

    pub fn len(&self) -> usize {
        self.state.read().preferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
