//! Blocking policy
//!
//! Streaming mode: fast block mode is checked before the standard threshold on
//! every chunk, ties block. Batch mode: a size-dependent threshold for items
//! that have already been received in full.

use crate::config::{ConfigStore, ThresholdConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-chunk verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Continue,
    BlockEarly,
    BlockStandard,
}

impl Decision {
    #[inline]
    pub fn is_block(&self) -> bool {
        !matches!(self, Decision::Continue)
    }
}

/// Threshold policy bound to the live configuration
#[derive(Clone)]
pub struct ThresholdPolicy {
    store: Arc<ConfigStore>,
}

impl ThresholdPolicy {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// Snapshot the live thresholds, applying a per-scan fast block override
    pub fn snapshot(&self, early_termination: Option<bool>) -> ThresholdConfig {
        let config = self.store.thresholds();
        match early_termination {
            Some(enabled) => config.with_early_termination(enabled),
            None => config,
        }
    }

    /// Decide against a fresh snapshot of the live thresholds
    pub fn decide_live(
        &self,
        probability: f64,
        bytes_scanned: u64,
        early_termination: Option<bool>,
    ) -> (Decision, ThresholdConfig) {
        let config = self.snapshot(early_termination);
        (Self::decide(probability, bytes_scanned, &config), config)
    }

    /// Block now?
    #[inline]
    pub fn decide(probability: f64, bytes_scanned: u64, config: &ThresholdConfig) -> Decision {
        if config.early_termination_enabled
            && bytes_scanned >= config.early_termination_min_bytes
            && probability >= config.early_termination_threshold
        {
            Decision::BlockEarly
        } else if probability >= config.standard {
            Decision::BlockStandard
        } else {
            Decision::Continue
        }
    }
}

const SMALL_ITEM_BYTES: usize = 100;
const LARGE_ITEM_BYTES: usize = 800;
const SMALL_ITEM_THRESHOLD: f64 = 0.75;
const INTERPOLATED_CEILING: f64 = 0.80;
const LARGE_ITEM_THRESHOLD: f64 = 0.85;

/// Size-dependent threshold for whole-item classification
pub fn dynamic_threshold(item_size: usize) -> f64 {
    if item_size <= SMALL_ITEM_BYTES {
        SMALL_ITEM_THRESHOLD
    } else if item_size <= LARGE_ITEM_BYTES {
        let ratio = (item_size - SMALL_ITEM_BYTES) as f64
            / (LARGE_ITEM_BYTES - SMALL_ITEM_BYTES) as f64;
        SMALL_ITEM_THRESHOLD + (INTERPOLATED_CEILING - SMALL_ITEM_THRESHOLD) * ratio
    } else {
        LARGE_ITEM_THRESHOLD
    }
}
