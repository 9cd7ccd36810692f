use crate::error::ConfigError;
use crate::graph::cycle_detection::SearchBudget;
use crate::optimization::efficiency::ScoringWeights;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Most wallets a single loop may involve, bounded by how many transfers
/// fit in one settlement transaction.
pub const MAX_CYCLE_LENGTH_LIMIT: usize = 11;

/// Longest a discovered loop may stay valid (30 days).
pub const MAX_LOOP_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Top-level engine configuration, usually loaded from TOML.
///
/// Every field has a default, so an empty document is a valid config.
///
/// ```
/// use tradeloop_engine::config::EngineConfig;
///
/// let config = EngineConfig::from_toml_str(
///     r#"
///     [discovery]
///     max_cycle_length = 4
///
///     [balancer]
///     tolerance = 0.05
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.discovery.max_cycle_length, 4);
/// assert_eq!(config.discovery.max_items_per_step, 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub discovery: DiscoveryConfig,
    pub balancer: BalancerConfig,
    pub scoring: ScoringWeights,
    pub trigger: TriggerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryConfig {
    /// Longest loop searched for, in participants.
    #[serde(default = "default_max_cycle_length")]
    pub max_cycle_length: usize,

    /// Cap on items moved by a single step.
    #[serde(default = "default_max_items_per_step")]
    pub max_items_per_step: usize,

    /// Path extensions a pass may explore before reporting a partial result.
    #[serde(default = "default_max_explored_paths")]
    pub max_explored_paths: usize,

    /// Wall-clock budget of the cycle search, in milliseconds. 0 disables it.
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,

    /// Loops kept per result after ranking.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Lifetime of a discovered loop.
    #[serde(default = "default_loop_ttl_secs")]
    pub loop_ttl_secs: u64,

    /// Stale passes a blocking discovery retries before giving up.
    #[serde(default = "default_max_stale_retries")]
    pub max_stale_retries: u32,

    /// Search start wallets on the rayon pool.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_max_cycle_length() -> usize {
    5
}

fn default_max_items_per_step() -> usize {
    4
}

fn default_max_explored_paths() -> usize {
    200_000
}

fn default_time_budget_ms() -> u64 {
    2_000
}

fn default_max_results() -> usize {
    100
}

fn default_loop_ttl_secs() -> u64 {
    86_400
}

fn default_max_stale_retries() -> u32 {
    3
}

fn default_parallel() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_cycle_length: default_max_cycle_length(),
            max_items_per_step: default_max_items_per_step(),
            max_explored_paths: default_max_explored_paths(),
            time_budget_ms: default_time_budget_ms(),
            max_results: default_max_results(),
            loop_ttl_secs: default_loop_ttl_secs(),
            max_stale_retries: default_max_stale_retries(),
            parallel: default_parallel(),
        }
    }
}

impl DiscoveryConfig {
    pub fn search_budget(&self) -> SearchBudget {
        SearchBudget {
            max_explored_paths: self.max_explored_paths,
            time_budget: (self.time_budget_ms > 0).then(|| Duration::from_millis(self.time_budget_ms)),
        }
    }

    pub fn loop_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.loop_ttl_secs.min(MAX_LOOP_TTL_SECS) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BalancerConfig {
    /// Largest accepted `|net_delta|` as a fraction of a participant's traded value.
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,

    /// Decimal places adjustments are rounded to.
    #[serde(default = "default_adjustment_scale")]
    pub adjustment_scale: u32,
}

fn default_tolerance() -> Decimal {
    dec!(0.10)
}

fn default_adjustment_scale() -> u32 {
    2
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            adjustment_scale: default_adjustment_scale(),
        }
    }
}

/// When store mutations start a background pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TriggerConfig {
    /// Mutations to accumulate before triggering re-discovery.
    #[serde(default = "default_mutation_threshold")]
    pub mutation_threshold: u64,
}

fn default_mutation_threshold() -> u64 {
    1
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mutation_threshold: default_mutation_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Completed passes remembered in the session history. 0 keeps none.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    50
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(input).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        let config = Self::from_toml_str(&input)?;
        log::info!("loaded engine config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.discovery;
        if !(2..=MAX_CYCLE_LENGTH_LIMIT).contains(&d.max_cycle_length) {
            return Err(invalid(
                "discovery.max_cycle_length",
                format!("must be between 2 and {}, got {}", MAX_CYCLE_LENGTH_LIMIT, d.max_cycle_length),
            ));
        }
        if d.max_items_per_step == 0 {
            return Err(invalid("discovery.max_items_per_step", "must be at least 1".into()));
        }
        if d.max_explored_paths == 0 {
            return Err(invalid("discovery.max_explored_paths", "must be at least 1".into()));
        }
        if d.max_results == 0 {
            return Err(invalid("discovery.max_results", "must be at least 1".into()));
        }
        if d.loop_ttl_secs == 0 || d.loop_ttl_secs > MAX_LOOP_TTL_SECS {
            return Err(invalid(
                "discovery.loop_ttl_secs",
                format!("must be between 1 and {}, got {}", MAX_LOOP_TTL_SECS, d.loop_ttl_secs),
            ));
        }

        let b = &self.balancer;
        if b.tolerance < Decimal::ZERO || b.tolerance > Decimal::ONE {
            return Err(invalid(
                "balancer.tolerance",
                format!("must be within [0, 1], got {}", b.tolerance),
            ));
        }
        if b.adjustment_scale > 28 {
            return Err(invalid("balancer.adjustment_scale", "must be at most 28".into()));
        }

        let w = &self.scoring;
        if w.balance < Decimal::ZERO || w.length < Decimal::ZERO || w.liquidity < Decimal::ZERO {
            return Err(invalid("scoring", "weights must not be negative".into()));
        }

        if self.trigger.mutation_threshold == 0 {
            return Err(invalid("trigger.mutation_threshold", "must be at least 1".into()));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}
