//! Process-lifetime scan counters
//!
//! Every completed session updates all counters inside one critical section,
//! so readers never see a scan counted in `total_scans` but missing from
//! `threats_blocked` or the byte total.

use crate::result::{ScanResult, ScanStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct Counters {
    total_scans: u64,
    threats_blocked: u64,
    clean_scans: u64,
    errored_scans: u64,
    total_bytes_scanned: u64,
    total_scan_time_ms: f64,
}

/// Shared session statistics
#[derive(Debug)]
pub struct SessionStats {
    counters: Mutex<Counters>,
    started_at: DateTime<Utc>,
}

/// Consistent copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_scans: u64,
    pub threats_blocked: u64,
    pub clean_scans: u64,
    pub errored_scans: u64,
    pub total_bytes_scanned: u64,
    pub avg_scan_time_ms: f64,
    pub started_at: DateTime<Utc>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started_at: Utc::now(),
        }
    }

    /// Fold one terminal result into the counters.
    ///
    /// `ERROR` results only bump `errored_scans`; their partial byte counts
    /// and timings are not mixed into the totals.
    pub fn record(&self, result: &ScanResult) {
        let mut c = self.counters.lock();
        match result.status {
            ScanStatus::Error => {
                c.errored_scans += 1;
            }
            ScanStatus::ThreatDetected | ScanStatus::Clean => {
                c.total_scans += 1;
                if result.blocked {
                    c.threats_blocked += 1;
                } else {
                    c.clean_scans += 1;
                }
                c.total_bytes_scanned += result.bytes_scanned;
                c.total_scan_time_ms += result.scan_time_ms;
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock();
        StatsSnapshot {
            total_scans: c.total_scans,
            threats_blocked: c.threats_blocked,
            clean_scans: c.clean_scans,
            errored_scans: c.errored_scans,
            total_bytes_scanned: c.total_bytes_scanned,
            avg_scan_time_ms: if c.total_scans == 0 {
                0.0
            } else {
                c.total_scan_time_ms / c.total_scans as f64
            },
            started_at: self.started_at,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
