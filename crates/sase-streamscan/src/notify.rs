//! Notification bus
//!
//! Non-blocking fan-out of scan events to subscribers (alerting, live
//! dashboards). Each subscriber owns a bounded queue; when it is full the
//! event is dropped for that subscriber and counted, the scan never waits.

use crate::result::ScanResult;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ThreatDetected,
    ScanCompleted,
    ScanProgress,
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Result(Box<ScanResult>),
    Progress {
        scan_id: Uuid,
        source: String,
        bytes_scanned: u64,
        probability: f64,
    },
}

/// `{event_type, payload}` pair pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl ScanEvent {
    pub fn threat_detected(result: &ScanResult) -> Self {
        Self {
            event_type: EventType::ThreatDetected,
            timestamp: Utc::now(),
            payload: EventPayload::Result(Box::new(result.clone())),
        }
    }

    pub fn scan_completed(result: &ScanResult) -> Self {
        Self {
            event_type: EventType::ScanCompleted,
            timestamp: Utc::now(),
            payload: EventPayload::Result(Box::new(result.clone())),
        }
    }

    pub fn progress(scan_id: Uuid, source: &str, bytes_scanned: u64, probability: f64) -> Self {
        Self {
            event_type: EventType::ScanProgress,
            timestamp: Utc::now(),
            payload: EventPayload::Progress {
                scan_id,
                source: source.to_string(),
                bytes_scanned,
                probability,
            },
        }
    }
}

/// Bus statistics
#[derive(Debug, Default)]
pub struct BusStats {
    pub events_published: AtomicU64,
    pub events_delivered: AtomicU64,
    pub events_dropped: AtomicU64,
}

/// Bounded, drop-on-full fan-out channel
#[derive(Clone)]
pub struct NotificationBus {
    subscribers: Arc<RwLock<Vec<mpsc::Sender<ScanEvent>>>>,
    capacity: usize,
    stats: Arc<BusStats>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
            stats: Arc::new(BusStats::default()),
        }
    }

    /// Register a subscriber with its own bounded queue
    pub fn subscribe(&self) -> mpsc::Receiver<ScanEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.write().push(tx);
        rx
    }

    /// Publish without blocking. Closed subscribers are pruned.
    pub fn publish(&self, event: ScanEvent) {
        self.stats.events_published.fetch_add(1, Ordering::Relaxed);

        let mut saw_closed = false;
        {
            let subscribers = self.subscribers.read();
            for tx in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {
                        self.stats.events_delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(event = ?event.event_type, "Subscriber queue full, event dropped");
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        if saw_closed {
            self.subscribers.write().retain(|tx| !tx.is_closed());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn dropped(&self) -> u64 {
        self.stats.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}
