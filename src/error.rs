use crate::core::item::{ItemId, ValuationError};
use crate::core::wallet::WalletId;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// A preference declaration the store refused. The store is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("wallet identifier must not be empty")]
    EmptyWalletId,

    #[error("wallet {wallet} declared an empty item identifier")]
    EmptyItemId { wallet: WalletId },

    #[error("wallet {wallet} declares {item} as both owned and wanted")]
    OwnedAndWanted { wallet: WalletId, item: ItemId },

    #[error("item {item} is already owned by {owner}, cannot also be owned by {claimant}")]
    OwnershipConflict {
        item: ItemId,
        owner: WalletId,
        claimant: WalletId,
    },
}

/// Why the balancer dropped a candidate cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum RejectionReason {
    #[error("imbalance {delta} for {wallet} exceeds allowed {allowed}")]
    ImbalanceExceedsTolerance {
        wallet: WalletId,
        delta: Decimal,
        allowed: Decimal,
    },

    #[error("{wallet} trades zero total value")]
    ZeroValueParticipant { wallet: WalletId },

    #[error("value sums for {wallet} overflow")]
    ValueOverflow { wallet: WalletId },
}

/// Why a discovery pass was aborted before publishing.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum PassFailure {
    #[error("snapshot version {pass_version} superseded by store version {current_version}")]
    StaleSnapshot {
        pass_version: u64,
        current_version: u64,
    },

    #[error("pass cancelled")]
    Cancelled,
}

/// Invalid or unreadable engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Returned by a blocking discovery call that could not publish a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("store kept changing, gave up after {attempts} stale passes")]
    RetriesExhausted { attempts: u32, last: PassFailure },

    #[error(transparent)]
    Aborted(#[from] PassFailure),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::OwnershipConflict {
            item: ItemId::new("mint-1"),
            owner: WalletId::new("alice"),
            claimant: WalletId::new("bob"),
        };
        assert_eq!(
            err.to_string(),
            "item mint-1 is already owned by alice, cannot also be owned by bob"
        );
    }

    #[test]
    fn test_rejection_serializes_tagged() {
        let reason = RejectionReason::ImbalanceExceedsTolerance {
            wallet: WalletId::new("alice"),
            delta: dec!(12),
            allowed: dec!(10),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "imbalanceExceedsTolerance");
        assert_eq!(json["wallet"], "alice");
    }

    #[test]
    fn test_discovery_error_from_failure() {
        let err: DiscoveryError = PassFailure::Cancelled.into();
        assert_eq!(err, DiscoveryError::Aborted(PassFailure::Cancelled));
        assert_eq!(err.to_string(), "pass cancelled");
    }
}
