use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a participant wallet in the trading pool.
///
/// Wallet identifiers are opaque strings (typically a chain address). They
/// are ordered lexicographically, which is what cycle canonicalization uses
/// to pick the first wallet of a loop.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::core::wallet::WalletId;
///
/// let alice = WalletId::new("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");
/// let bob = WalletId::new("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM");
/// assert!(alice < bob);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this wallet ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WalletId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WalletId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
