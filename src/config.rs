use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::{EngineErr, Result};

/// Largest parameter count kept resident inside the enclave (8MB of `f32`).
pub const DEFAULT_SHARD_THRESHOLD: usize = 2 * 1000 * 1000;

/// Amount of row shards a large weight matrix is streamed in.
pub const DEFAULT_SHARD_FACTOR: usize = 16;

/// Default size of the enclave arena in bytes.
pub const DEFAULT_POOL_CAPACITY: usize = 96 * 1024 * 1024;

/// Where a layer's weights may live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingPolicy {
    /// Enclave execution: shard whenever the weights exceed the threshold.
    #[default]
    Auto,
    /// Trusted host execution: weights are always copied in.
    Never,
    /// Always stream and verify, regardless of size.
    Always,
}

impl ShardingPolicy {
    /// Decides whether a weight matrix with `params` elements must stay outside the enclave.
    ///
    /// # Arguments
    /// * `params` - The amount of elements in the weight matrix.
    /// * `threshold` - The largest amount of elements allowed to be resident.
    pub fn should_shard(&self, params: usize, threshold: usize) -> bool {
        match self {
            Self::Auto => params > threshold,
            Self::Never => false,
            Self::Always => true,
        }
    }
}

/// Immutable execution bounds for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sharding: ShardingPolicy,
    pub shard_threshold: usize,
    pub shard_factor: NonZeroUsize,
    pub pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sharding: ShardingPolicy::default(),
            shard_threshold: DEFAULT_SHARD_THRESHOLD,
            shard_factor: NonZeroUsize::new(DEFAULT_SHARD_FACTOR).unwrap_or(NonZeroUsize::MIN),
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a configuration from JSON, missing fields take their defaults.
    ///
    /// # Arguments
    /// * `json` - The raw JSON document.
    ///
    /// # Returns
    /// The configuration or an error if it's malformed or inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns a copy of this configuration with another sharding policy.
    pub fn with_sharding(mut self, sharding: ShardingPolicy) -> Self {
        self.sharding = sharding;
        self
    }

    /// Returns a copy of this configuration with another shard factor.
    pub fn with_shard_factor(mut self, shard_factor: NonZeroUsize) -> Self {
        self.shard_factor = shard_factor;
        self
    }

    /// Checks the values are usable.
    ///
    /// # Returns
    /// An `InvalidConfig` error describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(EngineErr::InvalidConfig(
                "pool_capacity must be greater than zero".into(),
            ));
        }

        if self.sharding == ShardingPolicy::Auto && self.shard_threshold == 0 {
            return Err(EngineErr::InvalidConfig(
                "shard_threshold must be greater than zero under the auto policy".into(),
            ));
        }

        Ok(())
    }

    /// Decides whether a weight matrix with `params` elements must be sharded.
    pub fn should_shard(&self, params: usize) -> bool {
        self.sharding.should_shard(params, self.shard_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_defaults_match_enclave_budget() {
        let config = EngineConfig::default();
        assert_eq!(config.sharding, ShardingPolicy::Auto);
        assert_eq!(config.shard_threshold, 2_000_000);
        assert_eq!(config.shard_factor.get(), 16);
        assert!(!config.should_shard(2_000_000));
        assert!(config.should_shard(2_000_001));
    }

    #[test]
    fn test_policies_override_threshold() {
        assert!(!ShardingPolicy::Never.should_shard(usize::MAX, 1));
        assert!(ShardingPolicy::Always.should_shard(1, usize::MAX));
    }

    #[test]
    fn test_parses_partial_json() {
        let config = EngineConfig::from_json(r#"{ "sharding": "always", "shard_factor": 4 }"#)
            .unwrap();
        assert_eq!(config.sharding, ShardingPolicy::Always);
        assert_eq!(config.shard_factor.get(), 4);
        assert_eq!(config.shard_threshold, DEFAULT_SHARD_THRESHOLD);
    }

    #[test]
    fn test_rejects_zero_shard_factor() {
        let err = EngineConfig::from_json(r#"{ "shard_factor": 0 }"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_rejects_empty_pool() {
        let err = EngineConfig::from_json(r#"{ "pool_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, EngineErr::InvalidConfig(_)));
    }
}
