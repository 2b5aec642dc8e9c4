//! Threat sinks
//!
//! Every terminal result is handed to a sink. Persistence is the sink's
//! problem; the engine queues the result for [`SinkDispatcher`] and moves on,
//! so a slow sink never holds up a scan.

use crate::result::{ScanResult, ScanStatus, SourceType};
use crate::risk::RiskLevel;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Sink hand-off failures
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("failed to start sink worker: {0}")]
    SpawnFailed(String),
}

/// Receiver of terminal scan results. Called from the dispatcher thread,
/// never from a scan.
pub trait ThreatSink: Send + Sync {
    fn log_result(&self, result: &ScanResult) -> Result<(), SinkError>;
}

enum SinkJob {
    Log(Box<ScanResult>),
    Flush(oneshot::Sender<()>),
}

/// Bounded queue in front of a sink, drained by a dedicated thread.
///
/// `submit` never waits: when the queue is full the result is dropped for
/// the sink and counted. The thread exits once the dispatcher is dropped
/// and the queue is drained.
pub struct SinkDispatcher {
    tx: mpsc::Sender<SinkJob>,
    dropped: Arc<AtomicU64>,
}

impl SinkDispatcher {
    pub fn spawn(sink: Arc<dyn ThreatSink>, capacity: usize) -> Result<Self, SinkError> {
        let (tx, mut rx) = mpsc::channel::<SinkJob>(capacity.max(1));

        thread::Builder::new()
            .name("threat-sink".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    match job {
                        SinkJob::Log(result) => {
                            if let Err(e) = sink.log_result(&result) {
                                tracing::warn!(
                                    scan_id = %result.details.scan_id,
                                    error = %e,
                                    "Threat sink hand-off failed"
                                );
                            }
                        }
                        SinkJob::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .map_err(|e| SinkError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Queue a result without blocking
    pub fn submit(&self, result: &ScanResult) {
        match self.tx.try_send(SinkJob::Log(Box::new(result.clone()))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(scan_id = %result.details.scan_id, "Threat sink queue full, result dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(scan_id = %result.details.scan_id, "Threat sink worker is gone");
            }
        }
    }

    /// Wait until everything queued so far has reached the sink
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SinkJob::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Structured log line per result
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingThreatSink;

impl ThreatSink for TracingThreatSink {
    fn log_result(&self, result: &ScanResult) -> Result<(), SinkError> {
        match result.status {
            ScanStatus::ThreatDetected => tracing::warn!(
                target: "threats",
                scan_id = %result.details.scan_id,
                source = %result.source,
                source_type = %result.source_type,
                probability = result.probability,
                risk_level = %result.risk_level,
                bytes_scanned = result.bytes_scanned,
                scan_time_ms = result.scan_time_ms,
                early_termination = result.details.early_termination,
                "THREAT BLOCKED"
            ),
            ScanStatus::Clean => tracing::info!(
                target: "threats",
                scan_id = %result.details.scan_id,
                source = %result.source,
                probability = result.probability,
                bytes_scanned = result.bytes_scanned,
                "Clean scan logged"
            ),
            ScanStatus::Error => tracing::error!(
                target: "threats",
                scan_id = %result.details.scan_id,
                source = %result.source,
                error = ?result.details.error,
                "Scan failed"
            ),
        }
        Ok(())
    }
}

/// Bounded in-memory log of the most recent results
pub struct InMemoryThreatLog {
    entries: RwLock<VecDeque<ScanResult>>,
    capacity: usize,
}

impl InMemoryThreatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
        }
    }

    /// Newest first, with optional filters
    pub fn recent(
        &self,
        limit: usize,
        offset: usize,
        risk_level: Option<RiskLevel>,
        source_type: Option<SourceType>,
    ) -> Vec<ScanResult> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|r| risk_level.map_or(true, |l| r.risk_level == l))
            .filter(|r| source_type.map_or(true, |t| r.source_type == t))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, scan_id: Uuid) -> Option<ScanResult> {
        self.entries
            .read()
            .iter()
            .find(|r| r.details.scan_id == scan_id)
            .cloned()
    }

    /// Blocked threats per risk level
    pub fn distribution(&self) -> BTreeMap<RiskLevel, usize> {
        let mut dist = BTreeMap::new();
        for r in self.entries.read().iter().filter(|r| r.blocked) {
            *dist.entry(r.risk_level).or_insert(0) += 1;
        }
        dist
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryThreatLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ThreatSink for InMemoryThreatLog {
    fn log_result(&self, result: &ScanResult) -> Result<(), SinkError> {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(result.clone());
        Ok(())
    }
}

/// Fans one result out to several sinks; failures are collected, not fatal
pub struct CompositeSink {
    sinks: Vec<Arc<dyn ThreatSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn ThreatSink>>) -> Self {
        Self { sinks }
    }
}

impl ThreatSink for CompositeSink {
    fn log_result(&self, result: &ScanResult) -> Result<(), SinkError> {
        let failures: Vec<String> = self
            .sinks
            .iter()
            .filter_map(|s| s.log_result(result).err())
            .map(|e| e.to_string())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Unavailable(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ScanDetails;
    use chrono::Utc;
    use std::time::{Duration, Instant};

    fn result(source: &str, level: RiskLevel, blocked: bool) -> ScanResult {
        ScanResult {
            source: source.into(),
            source_type: SourceType::Url,
            probability: 0.5,
            risk_level: level,
            bytes_scanned: 512,
            blocked,
            scan_time_ms: 1.0,
            status: if blocked { ScanStatus::ThreatDetected } else { ScanStatus::Clean },
            details: ScanDetails::new(Uuid::new_v4(), Utc::now()),
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let log = InMemoryThreatLog::new(2);
        log.log_result(&result("a", RiskLevel::Benign, false)).unwrap();
        log.log_result(&result("b", RiskLevel::Benign, false)).unwrap();
        log.log_result(&result("c", RiskLevel::Benign, false)).unwrap();

        let recent = log.recent(10, 0, None, None);
        let sources: Vec<_> = recent.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["c", "b"]);
    }

    #[test]
    fn test_filters_and_distribution() {
        let log = InMemoryThreatLog::new(10);
        log.log_result(&result("a", RiskLevel::Critical, true)).unwrap();
        log.log_result(&result("b", RiskLevel::High, true)).unwrap();
        log.log_result(&result("c", RiskLevel::Critical, true)).unwrap();
        log.log_result(&result("d", RiskLevel::Benign, false)).unwrap();

        assert_eq!(log.recent(10, 0, Some(RiskLevel::Critical), None).len(), 2);
        assert_eq!(log.recent(10, 0, None, Some(SourceType::File)).len(), 0);
        assert_eq!(log.recent(1, 1, None, None)[0].source, "c");

        let dist = log.distribution();
        assert_eq!(dist.get(&RiskLevel::Critical), Some(&2));
        assert_eq!(dist.get(&RiskLevel::Benign), None);
    }

    #[test]
    fn test_lookup_by_scan_id() {
        let log = InMemoryThreatLog::new(4);
        let r = result("x", RiskLevel::Low, false);
        log.log_result(&r).unwrap();
        assert_eq!(log.get(r.details.scan_id).unwrap().source, "x");
        assert!(log.get(Uuid::new_v4()).is_none());
    }

    struct Broken;

    impl ThreatSink for Broken {
        fn log_result(&self, _: &ScanResult) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn test_composite_keeps_going() {
        let memory = Arc::new(InMemoryThreatLog::new(4));
        let sink = CompositeSink::new(vec![Arc::new(Broken), memory.clone()]);
        assert!(sink.log_result(&result("x", RiskLevel::Low, false)).is_err());
        assert_eq!(memory.len(), 1);
    }

    struct Slow(Arc<InMemoryThreatLog>);

    impl ThreatSink for Slow {
        fn log_result(&self, result: &ScanResult) -> Result<(), SinkError> {
            thread::sleep(Duration::from_millis(200));
            self.0.log_result(result)
        }
    }

    #[tokio::test]
    async fn test_dispatcher_does_not_wait_for_sink() {
        let memory = Arc::new(InMemoryThreatLog::new(8));
        let dispatcher = SinkDispatcher::spawn(Arc::new(Slow(memory.clone())), 8).unwrap();

        let start = Instant::now();
        dispatcher.submit(&result("a", RiskLevel::High, true));
        dispatcher.submit(&result("b", RiskLevel::Low, false));
        assert!(start.elapsed() < Duration::from_millis(100));

        dispatcher.flush().await;
        assert_eq!(memory.len(), 2);
        assert_eq!(dispatcher.dropped(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_drops_when_full() {
        let memory = Arc::new(InMemoryThreatLog::new(8));
        let dispatcher = SinkDispatcher::spawn(Arc::new(Slow(memory.clone())), 1).unwrap();

        for i in 0..4 {
            dispatcher.submit(&result(&format!("r{i}"), RiskLevel::Low, false));
        }
        dispatcher.flush().await;

        // one in flight on the worker, one queued, the rest dropped
        assert!(dispatcher.dropped() >= 2);
        assert_eq!(memory.len() as u64 + dispatcher.dropped(), 4);
    }
}
