use blob_repo::KeyLayout;
use serde::{Deserialize, Serialize};

use crate::error::{GcError, GcResult};

/// Settings for a [`GarbageCollector`](crate::GarbageCollector).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Key layout; must match the store's.
    pub keys: KeyLayout,
    /// Records fetched per enumeration page.
    pub batch_size: usize,
    /// Live-set size the filter is dimensioned for.
    pub expected_live_refs: u64,
    /// Target false-positive rate at `expected_live_refs`.
    pub false_positive_rate: f64,
    /// Blobs referenced within this many seconds of a pass are exempt.
    pub min_age_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            keys: KeyLayout::default(),
            batch_size: 5000,
            expected_live_refs: 100_000,
            false_positive_rate: 0.01,
            min_age_secs: 0,
        }
    }
}

impl GcConfig {
    /// Parse from TOML; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn validate(&self) -> GcResult<()> {
        if self.batch_size == 0 {
            return Err(GcError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.expected_live_refs == 0 {
            return Err(GcError::InvalidConfig("expected_live_refs must be positive".into()));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(GcError::InvalidConfig(format!(
                "false_positive_rate must be in (0, 1), got {}",
                self.false_positive_rate
            )));
        }
        Ok(())
    }
}
