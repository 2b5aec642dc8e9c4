//! Batch classification of fully-received items
//!
//! Small items score systematically higher than large ones, so each item
//! is judged against a threshold that grows with its size (see
//! [`dynamic_threshold`]). An item is malicious only when its score is
//! strictly above that threshold.

use crate::config::ConfigStore;
use crate::policy::dynamic_threshold;
use crate::risk::RiskLevel;
use crate::scorer::Scorer;
use crate::{Result, ScanError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const HIGH_RATIO: f64 = 0.5;
const MEDIUM_RATIO: f64 = 0.1;

/// One complete item (packet, attachment, upload)
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub name: String,
    pub data: Bytes,
}

impl BatchItem {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Verdict for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemVerdict {
    pub name: String,
    pub size: usize,
    pub probability: f64,
    pub threshold: f64,
    pub malicious: bool,
    pub risk_level: RiskLevel,
}

/// Batch summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub malicious: usize,
    pub benign: usize,
    pub malicious_ratio: f64,
    pub level: RiskLevel,
}

impl BatchSummary {
    fn from_verdicts(items: &[ItemVerdict]) -> Self {
        let total = items.len();
        let malicious = items.iter().filter(|v| v.malicious).count();
        let malicious_ratio = malicious as f64 / total as f64;
        let level = if malicious_ratio > HIGH_RATIO {
            RiskLevel::High
        } else if malicious_ratio > MEDIUM_RATIO {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        Self {
            total,
            malicious,
            benign: total - malicious,
            malicious_ratio,
            level,
        }
    }
}

/// Result of [`BatchClassifier::analyze`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAnalysis {
    pub items: Vec<ItemVerdict>,
    pub summary: BatchSummary,
    /// Lowest and highest threshold applied
    pub threshold_range: (f64, f64),
}

/// Scores whole items with size-dependent thresholds
pub struct BatchClassifier {
    scorer: Arc<dyn Scorer>,
    store: Arc<ConfigStore>,
    window_size: usize,
}

impl BatchClassifier {
    pub fn new(scorer: Arc<dyn Scorer>, store: Arc<ConfigStore>, window_size: usize) -> Self {
        Self {
            scorer,
            store,
            window_size: window_size.max(1),
        }
    }

    /// Score every item. The first `window_size` bytes are scored, the full
    /// size picks the threshold.
    pub async fn analyze(&self, items: Vec<BatchItem>) -> Result<BatchAnalysis> {
        if items.is_empty() {
            return Err(ScanError::EmptyBatch);
        }

        let table = self.store.risk_table();
        let mut verdicts = Vec::with_capacity(items.len());
        let mut low = f64::INFINITY;
        let mut high = f64::NEG_INFINITY;

        for item in items {
            let size = item.data.len();
            let window = &item.data[..size.min(self.window_size)];
            let probability = self.scorer.score(window).await?;
            let risk_level = table.classify(probability)?;
            let threshold = dynamic_threshold(size);
            low = low.min(threshold);
            high = high.max(threshold);

            verdicts.push(ItemVerdict {
                malicious: probability > threshold,
                name: item.name,
                size,
                probability,
                threshold,
                risk_level,
            });
        }

        let summary = BatchSummary::from_verdicts(&verdicts);
        tracing::info!(
            total = summary.total,
            malicious = summary.malicious,
            ratio = summary.malicious_ratio,
            level = %summary.level,
            "Batch analyzed"
        );

        Ok(BatchAnalysis {
            items: verdicts,
            summary,
            threshold_range: (low, high),
        })
    }
}
