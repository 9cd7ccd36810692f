use crate::core::wallet::WalletId;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Largest value a [`ValuationTable`] accepts for one item.
pub const MAX_ITEM_VALUE: Decimal = dec!(1000000000000000);

/// Globally unique identifier of a tradeable item (typically an NFT mint).
///
/// # Examples
///
/// ```
/// use tradeloop_engine::core::item::ItemId;
///
/// let a = ItemId::new("mint-a");
/// let b = ItemId::new("mint-b");
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Errors arising from valuation updates.
#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("item value must not be negative, got {value} for {item}")]
    NegativeValue { item: ItemId, value: Decimal },
    #[error("item value {value} for {item} exceeds the maximum of {max}", max = MAX_ITEM_VALUE)]
    ValueTooLarge { item: ItemId, value: Decimal },
    #[error("liquidity must be within [0, 1], got {liquidity} for {item}")]
    LiquidityOutOfRange { item: ItemId, liquidity: Decimal },
}

/// Estimated value and liquidity of an item.
///
/// `value` is denominated in an external currency. `liquidity` is in
/// `[0, 1]`, where 1 means the item trades readily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Valuation {
    pub value: Decimal,
    pub liquidity: Decimal,
}

impl Valuation {
    pub fn new(value: Decimal, liquidity: Decimal) -> Self {
        Self { value, liquidity }
    }
}

/// Source of item valuations.
///
/// Price feeds differ in shape; the engine only ever asks for a value and a
/// liquidity indicator per item. Returning `None` means the item is unknown
/// to the feed, and the engine then treats it as worthless and illiquid.
pub trait ValuationProvider: Send + Sync {
    fn valuation(&self, item: &ItemId) -> Option<Valuation>;

    /// Changes whenever any valuation changes. Providers that never change
    /// keep the default.
    fn version(&self) -> u64 {
        0
    }
}

impl ValuationProvider for HashMap<ItemId, Valuation> {
    fn valuation(&self, item: &ItemId) -> Option<Valuation> {
        self.get(item).copied()
    }
}

/// In-memory valuation table, updatable while discovery passes run.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::core::item::{ItemId, ValuationProvider, ValuationTable};
/// use rust_decimal_macros::dec;
///
/// let table = ValuationTable::new();
/// table.set(ItemId::new("mint-a"), dec!(12.5), dec!(0.8)).unwrap();
///
/// let v = table.valuation(&ItemId::new("mint-a")).unwrap();
/// assert_eq!(v.value, dec!(12.5));
/// assert!(table.valuation(&ItemId::new("mint-b")).is_none());
/// ```
#[derive(Debug, Default)]
pub struct ValuationTable {
    entries: RwLock<HashMap<ItemId, Valuation>>,
    version: AtomicU64,
}

impl ValuationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the valuation of an item, replacing any previous one.
    pub fn set(
        &self,
        item: ItemId,
        value: Decimal,
        liquidity: Decimal,
    ) -> Result<(), ValuationError> {
        if value < Decimal::ZERO {
            return Err(ValuationError::NegativeValue { item, value });
        }
        if value > MAX_ITEM_VALUE {
            return Err(ValuationError::ValueTooLarge { item, value });
        }
        if liquidity < Decimal::ZERO || liquidity > Decimal::ONE {
            return Err(ValuationError::LiquidityOutOfRange { item, liquidity });
        }
        let valuation = Valuation::new(value, liquidity);
        let mut entries = self.entries.write();
        if entries.insert(item, valuation) != Some(valuation) {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    pub fn remove(&self, item: &ItemId) -> Option<Valuation> {
        let removed = self.entries.write().remove(item);
        if removed.is_some() {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ValuationProvider for ValuationTable {
    fn valuation(&self, item: &ItemId) -> Option<Valuation> {
        self.entries.read().get(item).copied()
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl FromIterator<(ItemId, Valuation)> for ValuationTable {
    fn from_iter<T: IntoIterator<Item = (ItemId, Valuation)>>(iter: T) -> Self {
        Self {
            entries: RwLock::new(iter.into_iter().collect()),
            version: AtomicU64::new(0),
        }
    }
}

/// An item as seen by one discovery pass: its owner at snapshot time and
/// the valuation captured when the snapshot was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner: WalletId,
    pub value: Decimal,
    pub liquidity: Decimal,
}
