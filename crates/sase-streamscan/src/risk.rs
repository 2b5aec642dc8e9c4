//! Risk bucket classification
//!
//! Maps a malware probability onto five ordered severity labels through a
//! table of contiguous half-open intervals `[low, high)` covering `[0, 1]`.

use crate::config::ConfigError;
use crate::{Result, ScanError};
use serde::{Deserialize, Serialize};

/// Risk level, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Benign,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// All levels in ascending order
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::Benign,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Benign => "BENIGN",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BENIGN" => Ok(Self::Benign),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(format!("unknown risk level: {s}")),
        }
    }
}

/// One `[low, high)` interval of the table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBand {
    pub low: f64,
    pub high: f64,
    pub level: RiskLevel,
}

impl RiskBand {
    #[inline]
    fn contains(&self, p: f64) -> bool {
        self.low <= p && p < self.high
    }
}

/// Validated interval table. Bands partition `[0, 1]` exactly and the top
/// band is always `CRITICAL`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskTable {
    bands: Vec<RiskBand>,
}

impl RiskTable {
    /// Build from explicit bands, rejecting gaps, overlaps and misordering
    pub fn new(bands: Vec<RiskBand>) -> std::result::Result<Self, ConfigError> {
        let (first, last) = match (bands.first(), bands.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Err(ConfigError::InvalidRiskTable("no bands".into())),
        };

        if first.low != 0.0 {
            return Err(ConfigError::InvalidRiskTable(format!(
                "first band starts at {} instead of 0.0",
                first.low
            )));
        }
        if last.high != 1.0 {
            return Err(ConfigError::InvalidRiskTable(format!(
                "last band ends at {} instead of 1.0",
                last.high
            )));
        }
        if last.level != RiskLevel::Critical {
            return Err(ConfigError::InvalidRiskTable(
                "top band must be CRITICAL".into(),
            ));
        }

        for band in &bands {
            if !(band.low < band.high) {
                return Err(ConfigError::InvalidRiskTable(format!(
                    "empty band [{}, {}) for {}",
                    band.low, band.high, band.level
                )));
            }
        }

        for pair in bands.windows(2) {
            if pair[0].high != pair[1].low {
                return Err(ConfigError::InvalidRiskTable(format!(
                    "{} ends at {} but {} starts at {}",
                    pair[0].level, pair[0].high, pair[1].level, pair[1].low
                )));
            }
            if pair[0].level >= pair[1].level {
                return Err(ConfigError::InvalidRiskTable(format!(
                    "{} is not below {}",
                    pair[0].level, pair[1].level
                )));
            }
        }

        Ok(Self { bands })
    }

    /// Build the five-band table from its four cut points
    pub fn from_cut_points(
        low: f64,
        medium: f64,
        high: f64,
        critical: f64,
    ) -> std::result::Result<Self, ConfigError> {
        Self::new(bands_from_cut_points([low, medium, high, critical]))
    }

    /// Classify a probability. `1.0` falls into the top band even though
    /// the intervals are half-open.
    pub fn classify(&self, probability: f64) -> Result<RiskLevel> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ScanError::InvalidProbability(probability));
        }

        let top = self.bands[self.bands.len() - 1];
        if probability >= 1.0 {
            return Ok(top.level);
        }

        // first band whose upper bound lies above p
        let idx = self.bands.partition_point(|b| b.high <= probability);
        let band = self.bands[idx];
        debug_assert!(band.contains(probability));
        Ok(band.level)
    }

    pub fn bands(&self) -> &[RiskBand] {
        &self.bands
    }
}

/// Cut points of the default table: LOW, MEDIUM, HIGH and CRITICAL start here
pub const DEFAULT_CUT_POINTS: [f64; 4] = [0.3, 0.5, 0.7, 0.9];

fn bands_from_cut_points(cuts: [f64; 4]) -> Vec<RiskBand> {
    let edges = [0.0, cuts[0], cuts[1], cuts[2], cuts[3], 1.0];
    RiskLevel::ALL
        .iter()
        .enumerate()
        .map(|(i, &level)| RiskBand {
            low: edges[i],
            high: edges[i + 1],
            level,
        })
        .collect()
}

impl Default for RiskTable {
    /// The constant cut points are known to pass [`RiskTable::new`]
    fn default() -> Self {
        Self {
            bands: bands_from_cut_points(DEFAULT_CUT_POINTS),
        }
    }
}

impl<'de> Deserialize<'de> for RiskTable {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            bands: Vec<RiskBand>,
        }

        let raw = Raw::deserialize(deserializer)?;
        RiskTable::new(raw.bands).map_err(serde::de::Error::custom)
    }
}
