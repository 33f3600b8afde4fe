use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Ledger tuning, loadable from TOML. Every field has a default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub retry: RetryConfig,
    pub snapshot: SnapshotConfig,
    pub metadata: MetadataConfig,
}

/// Bounds for conflict and live-fetch retries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Re-reads of the chain tail after a lost append race.
    pub conflict_retries: u32,
    /// Total live-record fetch attempts per reconcile.
    pub live_fetch_attempts: u32,
    /// Pause between live-record fetch attempts.
    pub live_fetch_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 5,
            live_fetch_attempts: 3,
            live_fetch_backoff_ms: 50,
        }
    }
}

impl RetryConfig {
    pub fn live_fetch_backoff(&self) -> Duration {
        Duration::from_millis(self.live_fetch_backoff_ms)
    }
}

/// Versioned field set projected out of live records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub version: u32,
    pub fields: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            version: 1,
            fields: [
                "owner_name",
                "measured_area",
                "land_type",
                "village",
                "taluka",
                "district",
                "compensation_amount",
                "payment_status",
                "notice_number",
                "award_number",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub max_keys: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self { max_keys: 64 }
    }
}

impl LedgerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, LedgerError> {
        let config: Self = toml::from_str(input).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.retry.live_fetch_attempts == 0 {
            return Err(LedgerError::Config(
                "retry.live_fetch_attempts must be at least 1".into(),
            ));
        }
        if self.snapshot.fields.is_empty() {
            return Err(LedgerError::Config("snapshot.fields must not be empty".into()));
        }
        if self.snapshot.fields.iter().any(|f| f.trim().is_empty()) {
            return Err(LedgerError::Config(
                "snapshot.fields must not contain blank names".into(),
            ));
        }
        Ok(())
    }
}
