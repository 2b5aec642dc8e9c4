//! Engine configuration
//!
//! Static settings are loaded once from JSON (plus `STREAMSCAN_*` environment
//! overrides). Thresholds and the risk table live in a [`ConfigStore`] and
//! can be swapped at runtime without locks; in-flight sessions pick up the
//! new values on their next chunk.

use crate::risk::{RiskTable, DEFAULT_CUT_POINTS};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid risk table: {0}")]
    InvalidRiskTable(String),

    #[error("invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, min, max })
    }
}

/// Blocking thresholds. Read once per chunk by every running session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Standard block threshold
    pub standard: f64,
    /// Fast block mode
    pub early_termination_enabled: bool,
    pub early_termination_threshold: f64,
    /// Evidence floor before fast block mode may fire
    pub early_termination_min_bytes: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            standard: 0.7,
            early_termination_enabled: true,
            early_termination_threshold: 0.95,
            early_termination_min_bytes: 1024,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("standard", self.standard, 0.0, 1.0)?;
        check_range(
            "early_termination_threshold",
            self.early_termination_threshold,
            0.0,
            1.0,
        )
    }

    /// Same thresholds with fast block mode forced on or off
    pub fn with_early_termination(mut self, enabled: bool) -> Self {
        self.early_termination_enabled = enabled;
        self
    }
}

/// Cut points the five-band risk table is built from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        let [low, medium, high, critical] = DEFAULT_CUT_POINTS;
        Self {
            low,
            medium,
            high,
            critical,
        }
    }
}

impl RiskThresholds {
    pub fn to_table(&self) -> Result<RiskTable, ConfigError> {
        RiskTable::from_cut_points(self.low, self.medium, self.high, self.critical)
    }
}

/// Streaming parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bytes per chunk when splitting uploads and reading files
    pub chunk_size: usize,
    /// Bytes presented to the scorer
    pub window_size: usize,
    /// Stream is truncated past this many bytes
    pub max_file_size: u64,
    /// Maximum wait for a single chunk
    pub download_timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            window_size: 1500,
            max_file_size: 100 * 1024 * 1024,
            download_timeout_secs: 30,
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("chunk_size", self.chunk_size as f64, 64.0, 4096.0)?;
        check_range("window_size", self.window_size as f64, 512.0, 4096.0)?;
        check_range("max_file_size", self.max_file_size as f64, 1.0, u64::MAX as f64)?;
        check_range(
            "download_timeout_secs",
            self.download_timeout_secs as f64,
            1.0,
            300.0,
        )
    }
}

/// What to do with a scan request when all slots are busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    #[default]
    Wait,
    Reject,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,
    pub risk: RiskThresholds,
    pub streaming: StreamingConfig,
    pub max_concurrent_scans: usize,
    pub admission: AdmissionPolicy,
    /// Bounded capacity of the notification channel
    pub notification_capacity: usize,
    /// Results kept by the in-memory threat log
    pub threat_log_capacity: usize,
    /// Results queued for the threat sink before new ones are dropped
    pub sink_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            risk: RiskThresholds::default(),
            streaming: StreamingConfig::default(),
            max_concurrent_scans: 10,
            admission: AdmissionPolicy::Wait,
            notification_capacity: 256,
            threat_log_capacity: 1000,
            sink_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn load(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save to a JSON file
    pub fn save(&self, path: &str) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.risk.to_table()?;
        self.streaming.validate()?;
        check_range(
            "max_concurrent_scans",
            self.max_concurrent_scans as f64,
            1.0,
            100.0,
        )?;
        check_range(
            "notification_capacity",
            self.notification_capacity as f64,
            1.0,
            1_000_000.0,
        )?;
        check_range("sink_capacity", self.sink_capacity as f64, 1.0, 1_000_000.0)
    }

    /// Apply `STREAMSCAN_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                key: key.to_string(),
                value,
            })
        }

        macro_rules! override_field {
            ($key:literal => $field:expr) => {
                if let Some(v) = lookup($key) {
                    $field = parse($key, v)?;
                }
            };
        }

        override_field!("STREAMSCAN_CONFIDENCE_THRESHOLD" => self.thresholds.standard);
        override_field!("STREAMSCAN_EARLY_TERMINATION_ENABLED" => self.thresholds.early_termination_enabled);
        override_field!("STREAMSCAN_EARLY_TERMINATION_THRESHOLD" => self.thresholds.early_termination_threshold);
        override_field!("STREAMSCAN_EARLY_TERMINATION_MIN_BYTES" => self.thresholds.early_termination_min_bytes);
        override_field!("STREAMSCAN_CHUNK_SIZE" => self.streaming.chunk_size);
        override_field!("STREAMSCAN_WINDOW_SIZE" => self.streaming.window_size);
        override_field!("STREAMSCAN_MAX_FILE_SIZE" => self.streaming.max_file_size);
        override_field!("STREAMSCAN_DOWNLOAD_TIMEOUT" => self.streaming.download_timeout_secs);
        override_field!("STREAMSCAN_MAX_CONCURRENT_SCANS" => self.max_concurrent_scans);

        Ok(())
    }
}

/// Result of a threshold update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdUpdate {
    pub old_threshold: f64,
    pub new_threshold: f64,
}

/// Lock-free live configuration with atomic swaps
pub struct ConfigStore {
    thresholds: ArcSwap<ThresholdConfig>,
    risk: ArcSwap<RiskTable>,
    /// Bumped on every successful update
    version: AtomicU64,
}

impl ConfigStore {
    pub fn new(thresholds: ThresholdConfig, risk: RiskTable) -> Self {
        Self {
            thresholds: ArcSwap::from_pointee(thresholds),
            risk: ArcSwap::from_pointee(risk),
            version: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.thresholds.validate()?;
        Ok(Self::new(config.thresholds, config.risk.to_table()?))
    }

    /// Current thresholds (one consistent snapshot)
    #[inline]
    pub fn thresholds(&self) -> ThresholdConfig {
        **self.thresholds.load()
    }

    /// Current risk table
    #[inline]
    pub fn risk_table(&self) -> Arc<RiskTable> {
        self.risk.load_full()
    }

    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Change only the standard threshold
    pub fn update_threshold(&self, threshold: f64) -> Result<ThresholdUpdate, ConfigError> {
        check_range("standard", threshold, 0.0, 1.0)?;
        let previous = self.thresholds.rcu(|current| ThresholdConfig {
            standard: threshold,
            ..**current
        });
        self.version.fetch_add(1, Ordering::Release);
        tracing::info!(old = previous.standard, new = threshold, "Confidence threshold updated");
        Ok(ThresholdUpdate {
            old_threshold: previous.standard,
            new_threshold: threshold,
        })
    }

    /// Change fast block mode settings, leaving unspecified fields as they are
    pub fn set_early_termination(
        &self,
        enabled: bool,
        threshold: Option<f64>,
        min_bytes: Option<u64>,
    ) -> Result<ThresholdConfig, ConfigError> {
        if let Some(t) = threshold {
            check_range("early_termination_threshold", t, 0.0, 1.0)?;
        }
        self.thresholds.rcu(|current| ThresholdConfig {
            early_termination_enabled: enabled,
            early_termination_threshold: threshold.unwrap_or(current.early_termination_threshold),
            early_termination_min_bytes: min_bytes.unwrap_or(current.early_termination_min_bytes),
            ..**current
        });
        self.version.fetch_add(1, Ordering::Release);
        let updated = self.thresholds();
        tracing::info!(
            enabled = updated.early_termination_enabled,
            threshold = updated.early_termination_threshold,
            min_bytes = updated.early_termination_min_bytes,
            "Early termination settings updated"
        );
        Ok(updated)
    }

    /// Replace all thresholds at once
    pub fn replace_thresholds(&self, thresholds: ThresholdConfig) -> Result<(), ConfigError> {
        thresholds.validate()?;
        self.thresholds.store(Arc::new(thresholds));
        self.version.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Replace the risk table (already validated by construction)
    pub fn replace_risk_table(&self, table: RiskTable) {
        self.risk.store(Arc::new(table));
        self.version.fetch_add(1, Ordering::Release);
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(ThresholdConfig::default(), RiskTable::default())
    }
}
