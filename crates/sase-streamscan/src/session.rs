//! Scan session state machine
//!
//! ```text
//!            ┌──────── chunk, decision = CONTINUE ───────┐
//!            ▼                                           │
//!       ┌──────────┐  BLOCK_EARLY / BLOCK_STANDARD  ┌─────┴────┐
//!       │ SCANNING │───────────────────────────────▶│ BLOCKED  │
//!       └────┬─────┘                                └──────────┘
//!            │ exhausted / size limit               ┌──────────┐
//!            ├─────────────────────────────────────▶│  CLEAN   │
//!            │ fault / timeout / cancel             └──────────┘
//!            │                                      ┌──────────┐
//!            └─────────────────────────────────────▶│  ERROR   │
//!                                                   └──────────┘
//! ```
//!
//! Terminal transitions consume the session, so a finished session cannot
//! be stepped again.

use crate::buffer::SlidingWindowBuffer;
use crate::config::ConfigStore;
use crate::policy::{Decision, ThresholdPolicy};
use crate::result::{FaultKind, ScanDetails, ScanFault, ScanResult, ScanStatus, SourceType};
use crate::risk::RiskLevel;
use crate::scorer::{Scorer, ScorerError};
use crate::source::{ChunkSource, SourceSignal};
use crate::ScanError;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Called after every scored chunk with `(bytes_scanned, probability)`
pub type ProgressHook = Arc<dyn Fn(u64, f64) + Send + Sync>;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Scanning,
    Blocked,
    Clean,
    Error,
}

/// Outcome of feeding one chunk
pub enum Step {
    Continue(ScanSession),
    Terminal(ScanResult),
}

/// One scan of one stream. Owns its window and running counters.
pub struct ScanSession {
    source: String,
    source_type: SourceType,
    store: Arc<ConfigStore>,
    policy: ThresholdPolicy,
    early_override: Option<bool>,
    progress: Option<ProgressHook>,

    buffer: SlidingWindowBuffer,
    bytes_scanned: u64,
    max_probability: f64,
    threshold_used: Option<f64>,
    state: SessionState,

    details: ScanDetails,
    start: Instant,
}

impl ScanSession {
    pub fn new(
        source: impl Into<String>,
        source_type: SourceType,
        window_size: usize,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            source: source.into(),
            source_type,
            policy: ThresholdPolicy::new(store.clone()),
            store,
            early_override: None,
            progress: None,
            buffer: SlidingWindowBuffer::new(window_size),
            bytes_scanned: 0,
            max_probability: 0.0,
            threshold_used: None,
            state: SessionState::Scanning,
            details: ScanDetails::new(Uuid::new_v4(), Utc::now()),
            start: Instant::now(),
        }
    }

    /// Force fast block mode on or off for this scan only
    pub fn with_early_termination(mut self, enabled: Option<bool>) -> Self {
        self.early_override = enabled;
        self
    }

    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    pub fn scan_id(&self) -> Uuid {
        self.details.scan_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_scanned(&self) -> u64 {
        self.bytes_scanned
    }

    pub fn max_probability(&self) -> f64 {
        self.max_probability
    }

    /// Drive the session to a terminal result.
    ///
    /// Suspends only while waiting on the source (bounded by `chunk_timeout`)
    /// and on the scorer. Cancellation is honoured at both points.
    pub async fn run<S>(
        self,
        source: &mut S,
        scorer: &dyn Scorer,
        cancel: &CancellationToken,
        chunk_timeout: Duration,
    ) -> ScanResult
    where
        S: ChunkSource + ?Sized,
    {
        let mut session = self;
        tracing::info!(
            scan_id = %session.scan_id(),
            source = %session.source,
            source_type = %session.source_type,
            early_termination = ?session.early_override,
            scorer = scorer.name(),
            "Starting scan"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(chunk_timeout, source.next_chunk()) => Some(r),
            };

            let signal = match next {
                None => return session.fail(ScanError::Cancelled),
                Some(Err(_elapsed)) => {
                    return session.fail(ScanError::Timeout(chunk_timeout.as_secs()))
                }
                Some(Ok(Err(e))) => return session.fail(ScanError::ChunkSource(e)),
                Some(Ok(Ok(signal))) => signal,
            };

            match signal {
                SourceSignal::Chunk(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    session.absorb(&chunk);

                    let scored = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        r = scorer.score(session.buffer.snapshot()) => Some(r),
                    };
                    let Some(scored) = scored else {
                        return session.fail(ScanError::Cancelled);
                    };

                    match session.conclude_chunk(scored) {
                        Step::Continue(s) => session = s,
                        Step::Terminal(result) => return result,
                    }
                }
                SourceSignal::Exhausted => return session.finish(false),
                SourceSignal::SizeLimitExceeded => {
                    tracing::warn!(
                        scan_id = %session.scan_id(),
                        bytes_scanned = session.bytes_scanned,
                        "File size exceeded limit, finishing with current evidence"
                    );
                    return session.finish(true);
                }
            }
        }
    }

    /// Feed one chunk: append, score the window, consult the policy
    pub async fn process_chunk(mut self, chunk: &[u8], scorer: &dyn Scorer) -> Step {
        self.absorb(chunk);
        let scored = scorer.score(self.buffer.snapshot()).await;
        self.conclude_chunk(scored)
    }

    fn absorb(&mut self, chunk: &[u8]) {
        self.buffer.append(chunk);
        self.bytes_scanned += chunk.len() as u64;
        self.details.chunks_scanned += 1;
    }

    fn conclude_chunk(mut self, scored: Result<f64, ScorerError>) -> Step {
        match self.evaluate(scored) {
            Ok((decision, probability)) if decision.is_block() => {
                Step::Terminal(self.block(probability, decision))
            }
            Ok(_) => Step::Continue(self),
            Err(e) => Step::Terminal(self.fail(e)),
        }
    }

    fn evaluate(&mut self, scored: Result<f64, ScorerError>) -> Result<(Decision, f64), ScanError> {
        let probability = scored?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(ScanError::InvalidProbability(probability));
        }
        self.max_probability = self.max_probability.max(probability);

        let (decision, used) =
            self.policy
                .decide_live(probability, self.bytes_scanned, self.early_override);
        self.threshold_used = Some(used.standard);

        tracing::debug!(
            scan_id = %self.details.scan_id,
            bytes_scanned = self.bytes_scanned,
            probability,
            ?decision,
            "Chunk scored"
        );

        if let Some(hook) = &self.progress {
            hook(self.bytes_scanned, probability);
        }
        Ok((decision, probability))
    }

    /// SCANNING -> BLOCKED. Reports the triggering window's probability.
    fn block(mut self, probability: f64, decision: Decision) -> ScanResult {
        let risk_level = match self.store.risk_table().classify(probability) {
            Ok(level) => level,
            Err(e) => return self.fail(e),
        };
        let early = decision == Decision::BlockEarly;

        if early {
            tracing::warn!(
                scan_id = %self.details.scan_id,
                source = %self.source,
                bytes_scanned = self.bytes_scanned,
                probability,
                "EARLY TERMINATION: threat detected"
            );
        } else {
            tracing::warn!(
                scan_id = %self.details.scan_id,
                source = %self.source,
                bytes_scanned = self.bytes_scanned,
                probability,
                "Threat detected mid-stream"
            );
        }

        self.state = SessionState::Blocked;
        self.details.early_termination = early;
        self.into_result(probability, risk_level, true, ScanStatus::ThreatDetected)
    }

    /// SCANNING -> CLEAN. Reports the running maximum over all windows.
    pub fn finish(mut self, size_limit_exceeded: bool) -> ScanResult {
        let probability = self.max_probability;
        let risk_level = match self.store.risk_table().classify(probability) {
            Ok(level) => level,
            Err(e) => return self.fail(e),
        };

        self.state = SessionState::Clean;
        self.details.size_limit_exceeded = size_limit_exceeded;
        tracing::info!(
            scan_id = %self.details.scan_id,
            source = %self.source,
            bytes_scanned = self.bytes_scanned,
            max_probability = probability,
            "Scan clean"
        );
        self.into_result(probability, risk_level, false, ScanStatus::Clean)
    }

    /// SCANNING -> ERROR. No verdict is reported for a faulted stream.
    pub fn fail(mut self, error: ScanError) -> ScanResult {
        let kind = match &error {
            ScanError::Scorer(_) => FaultKind::Scorer,
            ScanError::Timeout(_) => FaultKind::Timeout,
            ScanError::Cancelled => FaultKind::Cancelled,
            ScanError::Overloaded(_) => FaultKind::Overloaded,
            ScanError::InvalidProbability(_) => FaultKind::InvalidProbability,
            _ => FaultKind::ChunkSource,
        };
        tracing::error!(
            scan_id = %self.details.scan_id,
            source = %self.source,
            bytes_scanned = self.bytes_scanned,
            error = %error,
            "Scan failed"
        );

        self.state = SessionState::Error;
        self.details.error = Some(ScanFault {
            kind,
            message: error.to_string(),
        });
        self.into_result(0.0, RiskLevel::Benign, false, ScanStatus::Error)
    }

    fn into_result(
        mut self,
        probability: f64,
        risk_level: RiskLevel,
        blocked: bool,
        status: ScanStatus,
    ) -> ScanResult {
        self.details.max_probability = self.max_probability;
        self.details.threshold_used = self.threshold_used;

        ScanResult {
            source: self.source,
            source_type: self.source_type,
            probability,
            risk_level,
            bytes_scanned: self.bytes_scanned,
            blocked,
            scan_time_ms: self.start.elapsed().as_secs_f64() * 1000.0,
            status,
            details: self.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdConfig;
    use crate::risk::RiskTable;
    use crate::source::{BytesChunkSource, SourceError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed probability sequence, then repeats the last value
    struct Scripted(Mutex<VecDeque<f64>>);

    impl Scripted {
        fn new(values: &[f64]) -> Self {
            Self(Mutex::new(values.iter().copied().collect()))
        }
    }

    #[async_trait]
    impl Scorer for Scripted {
        async fn score(&self, _window: &[u8]) -> Result<f64, ScorerError> {
            let mut q = self.0.lock();
            let v = if q.len() > 1 { q.pop_front() } else { q.front().copied() };
            Ok(v.unwrap_or(0.0))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Failing;

    #[async_trait]
    impl Scorer for Failing {
        async fn score(&self, _window: &[u8]) -> Result<f64, ScorerError> {
            Err(ScorerError::Backend("gpu lost".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn store() -> Arc<ConfigStore> {
        Arc::new(ConfigStore::new(
            ThresholdConfig {
                standard: 0.7,
                early_termination_enabled: true,
                early_termination_threshold: 0.95,
                early_termination_min_bytes: 1024,
            },
            RiskTable::default(),
        ))
    }

    fn session() -> ScanSession {
        ScanSession::new("upload.bin", SourceType::File, 1500, store())
    }

    async fn run_bytes(session: ScanSession, data: Vec<u8>, chunk: usize, scorer: &dyn Scorer) -> ScanResult {
        let mut source = BytesChunkSource::new(data, chunk);
        session
            .run(&mut source, scorer, &CancellationToken::new(), Duration::from_secs(5))
            .await
    }

    #[tokio::test]
    async fn test_clean_reports_running_max() {
        let scorer = Scripted::new(&[0.1, 0.4, 0.2]);
        let result = run_bytes(session(), vec![0; 1536], 512, &scorer).await;
        assert_eq!(result.status, ScanStatus::Clean);
        assert!(!result.blocked);
        assert_eq!(result.probability, 0.4);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(result.bytes_scanned, 1536);
        assert_eq!(result.details.chunks_scanned, 3);
    }

    #[tokio::test]
    async fn test_block_reports_triggering_probability() {
        let scorer = Scripted::new(&[0.2, 0.75, 0.1]);
        let result = run_bytes(session(), vec![0; 1536], 512, &scorer).await;
        assert_eq!(result.status, ScanStatus::ThreatDetected);
        assert!(result.blocked);
        assert_eq!(result.probability, 0.75);
        assert_eq!(result.bytes_scanned, 1024);
        assert!(!result.details.early_termination);
        assert_eq!(result.details.threshold_used, Some(0.7));
    }

    #[tokio::test]
    async fn test_early_termination_after_floor() {
        let scorer = Scripted::new(&[0.1, 0.1, 0.1, 0.96]);
        let result = run_bytes(session(), vec![0; 4096], 512, &scorer).await;
        assert!(result.blocked);
        assert!(result.details.early_termination);
        assert_eq!(result.bytes_scanned, 2048);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_early_floor_falls_back_to_standard() {
        let scorer = Scripted::new(&[0.99]);
        let result = run_bytes(session(), vec![0; 500], 500, &scorer).await;
        assert!(result.blocked);
        assert!(!result.details.early_termination);
        assert_eq!(result.bytes_scanned, 500);
    }

    #[tokio::test]
    async fn test_per_scan_override_disables_early() {
        let scorer = Scripted::new(&[0.1, 0.1, 0.1, 0.96]);
        let result = run_bytes(
            session().with_early_termination(Some(false)),
            vec![0; 4096],
            512,
            &scorer,
        )
        .await;
        assert!(result.blocked);
        assert!(!result.details.early_termination);
    }

    #[tokio::test]
    async fn test_scorer_fault_is_error() {
        let result = run_bytes(session(), vec![0; 1024], 512, &Failing).await;
        assert_eq!(result.status, ScanStatus::Error);
        assert_eq!(result.probability, 0.0);
        assert!(!result.blocked);
        assert_eq!(result.details.error.unwrap().kind, FaultKind::Scorer);
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_error() {
        let scorer = Scripted::new(&[1.5]);
        let result = run_bytes(session(), vec![0; 512], 512, &scorer).await;
        assert_eq!(result.status, ScanStatus::Error);
        assert_eq!(
            result.details.error.unwrap().kind,
            FaultKind::InvalidProbability
        );
    }

    #[tokio::test]
    async fn test_process_chunk_steps() {
        let scorer = Scripted::new(&[0.1, 0.8]);
        let s = match session().process_chunk(b"abc", &scorer).await {
            Step::Continue(s) => s,
            Step::Terminal(_) => panic!("first chunk should continue"),
        };
        assert_eq!(s.bytes_scanned(), 3);
        assert_eq!(s.state(), SessionState::Scanning);
        match s.process_chunk(b"def", &scorer).await {
            Step::Terminal(r) => assert!(r.blocked),
            Step::Continue(_) => panic!("second chunk should block"),
        }
    }

    struct Stalled;

    #[async_trait]
    impl ChunkSource for Stalled {
        async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_source_times_out() {
        let scorer = Scripted::new(&[0.0]);
        let result = session()
            .run(&mut Stalled, &scorer, &CancellationToken::new(), Duration::from_secs(30))
            .await;
        assert_eq!(result.status, ScanStatus::Error);
        assert_eq!(result.details.error.unwrap().kind, FaultKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let scorer = Scripted::new(&[0.99]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = BytesChunkSource::new(vec![0; 1024], 512);
        let result = session()
            .run(&mut source, &scorer, &cancel, Duration::from_secs(5))
            .await;
        assert_eq!(result.status, ScanStatus::Error);
        assert!(!result.blocked);
        assert_eq!(result.details.error.unwrap().kind, FaultKind::Cancelled);
    }

    #[tokio::test]
    async fn test_threshold_change_applies_to_next_chunk() {
        let store = store();
        let scorer = Scripted::new(&[0.5, 0.5]);
        let s = ScanSession::new("x", SourceType::Url, 1500, store.clone());
        let s = match s.process_chunk(b"a", &scorer).await {
            Step::Continue(s) => s,
            Step::Terminal(_) => panic!("0.5 is below 0.7"),
        };
        store.update_threshold(0.5).unwrap();
        match s.process_chunk(b"b", &scorer).await {
            Step::Terminal(r) => {
                assert!(r.blocked);
                assert_eq!(r.details.threshold_used, Some(0.5));
            }
            Step::Continue(_) => panic!("new threshold should block"),
        }
    }
}
