//! Random trading pools for load-testing discovery.
//!
//! The cycle search is exponential in the worst case, so its budgets are
//! tuned against generated pools of realistic shape: many wallets, a few
//! items each, and wants spread across the rest of the pool.

use crate::api::{OneOrMany, PoolInput, PreferenceInput, ValuationInput};
use crate::core::item::{ItemId, Valuation, ValuationTable};
use crate::core::preference::WalletPreference;
use crate::core::store::PreferenceStore;
use crate::error::ValidationError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

/// Shape of a generated pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub wallet_count: usize,
    pub items_per_wallet: usize,
    pub wants_per_wallet: usize,
    pub min_value: Decimal,
    pub max_value: Decimal,
    /// Fixed seed for reproducible pools; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            wallet_count: 20,
            items_per_wallet: 2,
            wants_per_wallet: 3,
            min_value: Decimal::from(10),
            max_value: Decimal::from(1_000),
            seed: None,
        }
    }
}

/// A generated pool: declarations plus a price for every owned item.
#[derive(Debug)]
pub struct GeneratedPool {
    pub preferences: Vec<WalletPreference>,
    pub valuations: Vec<(ItemId, Valuation)>,
}

impl GeneratedPool {
    pub fn valuation_table(&self) -> ValuationTable {
        self.valuations.iter().cloned().collect()
    }

    /// Upsert every declaration into `store`.
    pub fn load_into(&self, store: &PreferenceStore) -> Result<u64, ValidationError> {
        let mut version = store.version();
        for preference in &self.preferences {
            version = store.upsert_preference(preference.clone())?;
        }
        Ok(version)
    }

    /// The pool in the CLI's JSON input shape.
    pub fn to_input(&self) -> PoolInput {
        PoolInput {
            items: self
                .valuations
                .iter()
                .map(|(id, v)| ValuationInput {
                    id: id.to_string(),
                    value: v.value,
                    liquidity: v.liquidity,
                })
                .collect(),
            preferences: self
                .preferences
                .iter()
                .map(|p| PreferenceInput {
                    wallet_address: p.wallet().to_string(),
                    owned_item_or_items: OneOrMany::Many(p.owned().iter().map(ItemId::to_string).collect()),
                    wanted_item_or_items: OneOrMany::Many(p.wanted().iter().map(ItemId::to_string).collect()),
                    expires_at: None,
                })
                .collect(),
        }
    }
}

/// Generate a random pool. Every item has exactly one owner and no wallet
/// wants its own items.
pub fn generate_pool(config: &PoolConfig) -> GeneratedPool {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let owned: Vec<Vec<ItemId>> = (0..config.wallet_count)
        .map(|w| {
            (0..config.items_per_wallet)
                .map(|k| ItemId::new(format!("ITEM-{:04}-{}", w, k)))
                .collect()
        })
        .collect();

    // values in cents so they stay exact
    let min_cents = (config.min_value * Decimal::ONE_HUNDRED).trunc();
    let max_cents = (config.max_value * Decimal::ONE_HUNDRED).trunc();
    let (min_cents, max_cents) = (
        i64::try_from(min_cents).unwrap_or(0),
        i64::try_from(max_cents).unwrap_or(0),
    );

    let mut valuations = Vec::new();
    for item in owned.iter().flatten() {
        let cents = if max_cents > min_cents {
            rng.gen_range(min_cents..=max_cents)
        } else {
            min_cents
        };
        let liquidity = Decimal::new(rng.gen_range(30..=100), 2);
        valuations.push((item.clone(), Valuation::new(Decimal::new(cents, 2), liquidity)));
    }

    let mut preferences = Vec::with_capacity(config.wallet_count);
    for (w, own) in owned.iter().enumerate() {
        let others: Vec<&ItemId> = owned
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != w)
            .flat_map(|(_, items)| items.iter())
            .collect();
        let wanted: Vec<ItemId> = others
            .choose_multiple(&mut rng, config.wants_per_wallet.min(others.len()))
            .map(|item| (*item).clone())
            .collect();
        // owned and wanted are disjoint by construction
        if let Ok(preference) =
            WalletPreference::new(format!("WALLET-{:04}", w), own.iter().cloned(), wanted)
        {
            preferences.push(preference);
        }
    }

    GeneratedPool {
        preferences,
        valuations,
    }
}
