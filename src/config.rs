//! Engine Configuration
//!
//! All tunables in one serde struct. Defaults match production settings;
//! YAML files may override any subset of keys.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// L1 entry capacity
    pub l1_capacity: usize,
    /// L2 entry time-to-live
    pub l2_ttl_seconds: u64,
    /// Per-call timeout for store and view access
    pub l3_timeout_ms: u64,
    /// Search radius for coordinate-based linking
    pub spatial_match_radius_km: f64,
    /// Minimum name similarity accepted by fuzzy linking (exclusive)
    pub fuzzy_match_threshold: f64,
    /// Attempts per view refresh before the view is left stale
    pub view_refresh_retry_max: u32,

    /// Concurrent L2 connections
    pub l2_pool_size: usize,
    /// How long to wait for an L2 connection before treating it as a miss
    pub l2_acquire_timeout_ms: u64,
    /// Concurrent store/view connections
    pub store_pool_size: usize,
    /// First retry delay for view refresh
    pub view_refresh_backoff_base_ms: u64,
    /// Upper bound on the retry delay
    pub view_refresh_backoff_max_ms: u64,
    /// Latency samples kept for percentile evaluation
    pub latency_sample_window: usize,
    /// p95 target for the resolve path
    pub slo_p95_target_us: u64,
    /// Row cap for `query_in_hierarchy` when the caller gives none
    pub default_query_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            l2_ttl_seconds: 300,
            l3_timeout_ms: 200,
            spatial_match_radius_km: 50.0,
            fuzzy_match_threshold: 0.3,
            view_refresh_retry_max: 3,
            l2_pool_size: 16,
            l2_acquire_timeout_ms: 20,
            store_pool_size: 32,
            view_refresh_backoff_base_ms: 100,
            view_refresh_backoff_max_ms: 5_000,
            latency_sample_window: 10_000,
            slo_p95_target_us: 1_000,
            default_query_limit: 100,
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document; missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.l1_capacity == 0 {
            return Err(Error::Config("l1_capacity must be at least 1".into()));
        }
        if self.l2_pool_size == 0 || self.store_pool_size == 0 {
            return Err(Error::Config("pool sizes must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_match_threshold) {
            return Err(Error::Config(format!(
                "fuzzy_match_threshold {} outside [0, 1]",
                self.fuzzy_match_threshold
            )));
        }
        if !(self.spatial_match_radius_km > 0.0) {
            return Err(Error::Config(format!(
                "spatial_match_radius_km must be positive, got {}",
                self.spatial_match_radius_km
            )));
        }
        if self.view_refresh_retry_max == 0 {
            return Err(Error::Config("view_refresh_retry_max must be at least 1".into()));
        }
        if self.view_refresh_backoff_base_ms > self.view_refresh_backoff_max_ms {
            return Err(Error::Config(
                "view_refresh_backoff_base_ms exceeds view_refresh_backoff_max_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_seconds)
    }

    pub fn l3_timeout(&self) -> Duration {
        Duration::from_millis(self.l3_timeout_ms)
    }

    pub fn l2_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.l2_acquire_timeout_ms)
    }

    pub fn slo_p95_target(&self) -> Duration {
        Duration::from_micros(self.slo_p95_target_us)
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn refresh_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay = self.view_refresh_backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.view_refresh_backoff_max_ms))
    }
}
