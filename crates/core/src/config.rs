use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::key::ALL_CLIENTS;

/// Rows from years before this are treated as stale uploads and dropped.
pub const DEFAULT_MIN_YEAR: i32 = 2022;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub min_year: i32,
    /// Mask trailing zeros of realized series returned for display.
    pub mask_trailing_zeros: bool,
    /// Client label that selects every client.
    pub wildcard_client: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_year: DEFAULT_MIN_YEAR,
            mask_trailing_zeros: true,
            wildcard_client: ALL_CLIENTS.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let config: Self =
            toml::from_str(text).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        if config.wildcard_client.trim().is_empty() {
            return Err(CoreError::InvalidConfig("wildcard_client must not be empty".into()));
        }
        Ok(config)
    }

    pub fn includes_year(&self, year: i32) -> bool {
        year >= self.min_year
    }
}
