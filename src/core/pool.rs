use crate::core::preference::WalletPreference;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Aggregate counts of the trading pool, published next to discovery results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    /// Wallets declaring at least one owned or wanted item.
    pub wallet_count: usize,
    /// Distinct items currently declared owned.
    pub item_count: usize,
}

impl PoolState {
    /// Count wallets and owned items in one pass.
    pub fn from_preferences<'a>(preferences: impl IntoIterator<Item = &'a WalletPreference>) -> Self {
        let mut wallet_count = 0;
        let mut items = HashSet::new();
        for preference in preferences {
            if preference.is_empty() {
                continue;
            }
            wallet_count += 1;
            items.extend(preference.owned().iter());
        }
        Self {
            wallet_count,
            item_count: items.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_counts() {
        let prefs = vec![
            WalletPreference::new("alice", ["x", "z"], ["y"]).unwrap(),
            WalletPreference::new("bob", ["y"], ["q"]).unwrap(),
            // wants only, still counts as a participant
            WalletPreference::new("carol", Vec::<&str>::new(), ["x"]).unwrap(),
        ];
        let state = PoolState::from_preferences(&prefs);
        assert_eq!(state.wallet_count, 3);
        assert_eq!(state.item_count, 3);
    }

    #[test]
    fn test_empty_pool() {
        let state = PoolState::from_preferences(std::iter::empty());
        assert_eq!(state, PoolState::default());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(PoolState {
            wallet_count: 2,
            item_count: 5,
        })
        .unwrap();
        assert_eq!(json["walletCount"], 2);
        assert_eq!(json["itemCount"], 5);
    }
}
