//! Combined configuration for the sync core.

use serde::{Deserialize, Serialize};

use vitalsync_common::{Error, Result};

use crate::batch::BatchConfig;
use crate::conflict::ConflictConfig;
use crate::engine::SyncConfig;
use crate::quota::QuotaConfig;
use crate::retry::RetryConfig;

/// Every tunable of the sync core. Sections missing from JSON take defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub quota: QuotaConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub sync: SyncConfig,
    pub conflict: ConflictConfig,
}

impl CoreConfig {
    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can honor.
    pub fn validate(&self) -> Result<()> {
        if self.quota.limit == 0 {
            return Err(Error::InvalidInput("quota.limit must be positive".to_string()));
        }
        if self.quota.window.is_zero() {
            return Err(Error::InvalidInput("quota.window must be positive".to_string()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::InvalidInput(
                "retry.backoff_multiplier must be at least 1".to_string(),
            ));
        }
        let c = &self.conflict;
        if !(0.0..=1.0).contains(&c.min_overlap_fraction) {
            return Err(Error::InvalidInput(
                "conflict.min_overlap_fraction must lie in [0, 1]".to_string(),
            ));
        }
        if c.medium_threshold > c.high_threshold {
            return Err(Error::InvalidInput(
                "conflict.medium_threshold exceeds high_threshold".to_string(),
            ));
        }
        let w = &c.weights;
        if w.overlap < 0.0 || w.inflation < 0.0 || w.untrusted < 0.0 {
            return Err(Error::InvalidInput("conflict weights must be non-negative".to_string()));
        }
        Ok(())
    }
}
