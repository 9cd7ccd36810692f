//! Request and response shapes exchanged with the transport layer.
//!
//! All types use camelCase on the wire.

use crate::core::item::{ItemId, Valuation, ValuationError, ValuationTable};
use crate::core::pool::PoolState;
use crate::core::preference::WalletPreference;
use crate::core::trade_loop::TradeLoop;
use crate::error::ValidationError;
use crate::session::result::{DiscoveryQuery, DiscoveryResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A field that accepts either a single value or a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// Declares or replaces a wallet's owned and wanted items.
///
/// ```
/// use tradeloop_engine::api::PreferenceInput;
///
/// let input: PreferenceInput = serde_json::from_str(
///     r#"{"walletAddress": "alice", "ownedItemOrItems": "mint-a", "wantedItemOrItems": ["mint-b", "mint-c"]}"#,
/// )
/// .unwrap();
/// let pref = input.into_preference().unwrap();
/// assert_eq!(pref.owned().len(), 1);
/// assert_eq!(pref.wanted().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceInput {
    pub wallet_address: String,
    #[serde(default)]
    pub owned_item_or_items: OneOrMany<String>,
    #[serde(default)]
    pub wanted_item_or_items: OneOrMany<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PreferenceInput {
    pub fn into_preference(self) -> Result<WalletPreference, ValidationError> {
        let preference = WalletPreference::new(
            self.wallet_address,
            self.owned_item_or_items.into_vec(),
            self.wanted_item_or_items.into_vec(),
        )?;
        Ok(match self.expires_at {
            Some(at) => preference.with_expiry(at),
            None => preference,
        })
    }
}

/// Asks for loops around one wallet.
///
/// `hasItem` and `wantsItem` are merged into the wallet's declarations
/// before the search, then used as filters on the returned loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    pub wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wants_item: Option<String>,
}

impl DiscoveryRequest {
    pub fn query(&self) -> DiscoveryQuery {
        DiscoveryQuery {
            focus: Some(self.wallet_address.as_str().into()),
            has_item: self.has_item.as_deref().map(ItemId::from),
            wants_item: self.wants_item.as_deref().map(ItemId::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub success: bool,
    pub trades: Vec<TradeLoop>,
    pub pool_state: PoolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoveryResponse {
    pub fn from_result(result: &DiscoveryResult) -> Self {
        Self {
            success: true,
            trades: result.loops.clone(),
            pool_state: result.pool_state,
            error: None,
        }
    }

    pub fn failure(error: impl std::fmt::Display, pool_state: PoolState) -> Self {
        Self {
            success: false,
            trades: Vec::new(),
            pool_state,
            error: Some(error.to_string()),
        }
    }
}

/// One item price as supplied by a valuation feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationInput {
    pub id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub liquidity: Decimal,
}

impl ValuationInput {
    pub fn valuation(&self) -> Valuation {
        Valuation::new(self.value, self.liquidity)
    }
}

/// A whole trading pool: item valuations plus every wallet's declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInput {
    #[serde(default)]
    pub items: Vec<ValuationInput>,
    #[serde(default)]
    pub preferences: Vec<PreferenceInput>,
}

impl PoolInput {
    /// Validated valuation table of every listed item.
    pub fn valuation_table(&self) -> Result<ValuationTable, ValuationError> {
        let table = ValuationTable::new();
        for item in &self.items {
            table.set(ItemId::new(item.id.as_str()), item.value, item.liquidity)?;
        }
        Ok(table)
    }
}
