//! Scan result records

use crate::risk::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of stream being scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Url,
    File,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url => write!(f, "URL"),
            Self::File => write!(f, "FILE"),
        }
    }
}

/// Terminal scan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Clean,
    ThreatDetected,
    Error,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "CLEAN"),
            Self::ThreatDetected => write!(f, "THREAT_DETECTED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Why a session ended in `ERROR`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Scorer,
    ChunkSource,
    Timeout,
    Cancelled,
    Overloaded,
    InvalidProbability,
}

/// Diagnostic attached to an `ERROR` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFault {
    pub kind: FaultKind,
    pub message: String,
}

/// Free-form evidence attached to every result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDetails {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Blocked by fast block mode rather than the standard threshold
    #[serde(default)]
    pub early_termination: bool,
    /// Stream was cut at the configured size cap
    #[serde(default)]
    pub size_limit_exceeded: bool,
    /// Highest window probability seen over the whole stream
    #[serde(default)]
    pub max_probability: f64,
    /// Standard threshold in force for the last scored chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_used: Option<f64>,
    #[serde(default)]
    pub chunks_scanned: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ScanFault>,
}

impl ScanDetails {
    pub fn new(scan_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            scan_id,
            started_at,
            early_termination: false,
            size_limit_exceeded: false,
            max_probability: 0.0,
            threshold_used: None,
            chunks_scanned: 0,
            error: None,
        }
    }
}

/// Terminal result of one scan session. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub source: String,
    pub source_type: SourceType,
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub bytes_scanned: u64,
    pub blocked: bool,
    pub scan_time_ms: f64,
    pub status: ScanStatus,
    pub details: ScanDetails,
}

impl ScanResult {
    pub fn is_threat(&self) -> bool {
        self.status == ScanStatus::ThreatDetected
    }

    pub fn is_error(&self) -> bool {
        self.status == ScanStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_result_survives_json() {
        let mut details = ScanDetails::new(Uuid::new_v4(), Utc::now());
        details.early_termination = true;
        details.max_probability = 0.97;
        details.threshold_used = Some(0.7);
        details.chunks_scanned = 4;

        let result = ScanResult {
            source: "http://example.com/payload.bin".into(),
            source_type: SourceType::Url,
            probability: 0.96,
            risk_level: RiskLevel::Critical,
            bytes_scanned: 2048,
            blocked: true,
            scan_time_ms: 12.5,
            status: ScanStatus::ThreatDetected,
            details,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"THREAT_DETECTED\""));
        assert!(json.contains("\"URL\""));
        let back: ScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_error_detail_serialized() {
        let mut details = ScanDetails::new(Uuid::new_v4(), Utc::now());
        details.error = Some(ScanFault {
            kind: FaultKind::ChunkSource,
            message: "connection reset".into(),
        });
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["error"]["kind"], "chunk_source");
    }

    proptest! {
        #[test]
        fn prop_floats_survive_json(
            probability in 0.0f64..=1.0,
            max_probability in 0.0f64..=1.0,
            scan_time_ms in 0.0f64..1.0e9,
        ) {
            let mut details = ScanDetails::new(Uuid::new_v4(), Utc::now());
            details.max_probability = max_probability;
            details.threshold_used = Some(probability);
            let result = ScanResult {
                source: "upload.bin".into(),
                source_type: SourceType::File,
                probability,
                risk_level: RiskLevel::Medium,
                bytes_scanned: 1536,
                blocked: false,
                scan_time_ms,
                status: ScanStatus::Clean,
                details,
            };

            let json = serde_json::to_string(&result).unwrap();
            let back: ScanResult = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back.probability.to_bits(), probability.to_bits());
            prop_assert_eq!(back.scan_time_ms.to_bits(), scan_time_ms.to_bits());
            prop_assert_eq!(back, result);
        }
    }

    #[test]
    fn test_long_mantissa_survives_json() {
        let value = 486.791_420_390_567_57_f64;
        let json = serde_json::to_string(&value).unwrap();
        let back: f64 = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_bits(), value.to_bits());
    }
}
