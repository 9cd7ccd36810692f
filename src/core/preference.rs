use crate::core::item::ItemId;
use crate::core::wallet::WalletId;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A wallet's declared trading intent: what it will give up and what it wants.
///
/// Owned and wanted sets are kept disjoint; duplicate identifiers in the
/// input collapse into one entry. Preferences are validated on construction,
/// so anything the store receives is already well-formed on its own. Cross-wallet
/// rules (single ownership per item) are checked by the store.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::core::preference::WalletPreference;
///
/// let pref = WalletPreference::new("alice", ["mint-x"], ["mint-y", "mint-y"]).unwrap();
/// assert_eq!(pref.owned().len(), 1);
/// assert_eq!(pref.wanted().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletPreference {
    wallet: WalletId,
    owned: BTreeSet<ItemId>,
    wanted: BTreeSet<ItemId>,
    /// After this instant the declaration is purged from the store.
    expires_at: Option<DateTime<Utc>>,
}

impl WalletPreference {
    /// Create a validated preference.
    pub fn new<O, W>(
        wallet: impl Into<WalletId>,
        owned: O,
        wanted: W,
    ) -> Result<Self, ValidationError>
    where
        O: IntoIterator,
        O::Item: Into<ItemId>,
        W: IntoIterator,
        W::Item: Into<ItemId>,
    {
        let wallet = wallet.into();
        if wallet.is_empty() {
            return Err(ValidationError::EmptyWalletId);
        }
        let owned: BTreeSet<ItemId> = owned.into_iter().map(Into::into).collect();
        let wanted: BTreeSet<ItemId> = wanted.into_iter().map(Into::into).collect();

        if owned.iter().chain(wanted.iter()).any(ItemId::is_empty) {
            return Err(ValidationError::EmptyItemId { wallet });
        }
        if let Some(item) = owned.intersection(&wanted).next() {
            return Err(ValidationError::OwnedAndWanted {
                item: item.clone(),
                wallet,
            });
        }

        Ok(Self {
            wallet,
            owned,
            wanted,
            expires_at: None,
        })
    }

    /// Set the expiry instant.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    // --- Accessors ---

    pub fn wallet(&self) -> &WalletId {
        &self.wallet
    }

    pub fn owned(&self) -> &BTreeSet<ItemId> {
        &self.owned
    }

    pub fn wanted(&self) -> &BTreeSet<ItemId> {
        &self.wanted
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// True when the wallet declares nothing at all.
    pub fn is_empty(&self) -> bool {
        self.owned.is_empty() && self.wanted.is_empty()
    }

    /// A copy of this preference without the given items.
    pub fn without<'a>(
        &self,
        owned: impl IntoIterator<Item = &'a ItemId>,
        wanted: impl IntoIterator<Item = &'a ItemId>,
    ) -> Self {
        let mut next = self.clone();
        for item in owned {
            next.owned.remove(item);
        }
        for item in wanted {
            next.wanted.remove(item);
        }
        next
    }

    /// A copy of this preference with extra declarations merged in.
    ///
    /// Fails if the merge would make an item both owned and wanted.
    pub fn merged<O, W>(&self, owned: O, wanted: W) -> Result<Self, ValidationError>
    where
        O: IntoIterator<Item = ItemId>,
        W: IntoIterator<Item = ItemId>,
    {
        let merged = Self::new(
            self.wallet.clone(),
            self.owned.iter().cloned().chain(owned),
            self.wanted.iter().cloned().chain(wanted),
        )?;
        Ok(Self {
            expires_at: self.expires_at,
            ..merged
        })
    }
}
