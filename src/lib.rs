//! # tradeloop-engine
//!
//! Multi-party barter loop discovery for item collectors.
//!
//! Wallets declare items they own and are willing to give up, and items
//! they want. The engine finds closed chains of wallets in which everyone
//! gives something and receives something they asked for, keeps the chains
//! whose participants trade roughly equal value, and ranks them.
//!
//! ## Architecture
//!
//! - **core**: wallets, items and valuations, preferences, the versioned
//!   preference store, trade loops and pool statistics
//! - **graph**: the want graph, strongly connected components, cycle search
//! - **optimization**: value balancing and efficiency scoring
//! - **session**: discovery passes, streaming and the background worker
//! - **engine** / **api**: the facade and its request/response shapes
//! - **simulation**: random pools for load-testing

pub mod api;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod graph;
pub mod optimization;
pub mod session;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::core::item::{ItemId, Valuation, ValuationProvider, ValuationTable};
    pub use crate::core::pool::PoolState;
    pub use crate::core::preference::WalletPreference;
    pub use crate::core::store::{PreferenceStore, StoreSnapshot};
    pub use crate::core::trade_loop::{TradeLoop, TradeStep};
    pub use crate::core::wallet::WalletId;
    pub use crate::engine::TradeLoopEngine;
    pub use crate::graph::want_graph::WantGraph;
    pub use crate::session::result::{DiscoveryQuery, DiscoveryResult};
    pub use crate::session::DiscoverySession;
}
