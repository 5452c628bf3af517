//! Engine configuration loaded from JSON

use crate::error::{ForecastError, Result};
use crate::frequency::Frequency;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do when two rows share a timestamp after parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail ingestion with a data validation error
    #[default]
    Reject,
    /// Keep the row that appears last in the input
    KeepLast,
    /// Average the values sharing a timestamp
    Mean,
}

/// Settings for turning a raw table into a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Try day-first numeric layouts before month-first ones
    pub day_first: bool,
    pub duplicates: DuplicatePolicy,
    /// Used when the spacing of the series cannot be inferred
    pub default_frequency: Frequency,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            day_first: true,
            duplicates: DuplicatePolicy::Reject,
            default_frequency: Frequency::monthly(),
        }
    }
}

/// Top level engine settings
///
/// Every field has a default, so `{}` is a valid configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fewest observations any strategy is allowed to run on
    pub min_observations: usize,
    pub ingest: IngestConfig,
    /// Applied to requests that do not carry their own timeout
    pub default_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_observations: 3,
            ingest: IngestConfig::default(),
            default_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ForecastError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_observations == 0 {
            return Err(ForecastError::Config(
                "min_observations must be at least 1".to_string(),
            ));
        }
        if self.default_timeout_secs == Some(0) {
            return Err(ForecastError::Config(
                "default_timeout_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}
