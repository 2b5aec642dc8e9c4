//! Scan engine
//!
//! Owns the shared pieces (live config, scorer, stats, notification bus,
//! sink) and runs any number of independent sessions against them.

use crate::batch::{BatchAnalysis, BatchClassifier, BatchItem};
use crate::config::{AdmissionPolicy, ConfigError, ConfigStore, EngineConfig, ThresholdConfig, ThresholdUpdate};
use crate::notify::{NotificationBus, ScanEvent};
use crate::result::{ScanResult, SourceType};
use crate::scorer::Scorer;
use crate::session::{ProgressHook, ScanSession};
use crate::sink::{SinkDispatcher, ThreatSink};
use crate::source::{BytesChunkSource, Capped, ChunkSource, ReaderChunkSource};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::ScanError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// One scan to run
#[derive(Clone)]
pub struct ScanRequest {
    /// URL or file name, echoed in the result
    pub source: String,
    pub source_type: SourceType,
    /// Per-scan fast block override; `None` follows the live config
    pub early_termination: Option<bool>,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressHook>,
    /// Also publish `scan_progress` events on the bus
    pub publish_progress: bool,
}

impl ScanRequest {
    pub fn new(source: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            source: source.into(),
            source_type,
            early_termination: None,
            cancel: CancellationToken::new(),
            progress: None,
            publish_progress: false,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(url, SourceType::Url)
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, SourceType::File)
    }

    pub fn early_termination(mut self, enabled: Option<bool>) -> Self {
        self.early_termination = enabled;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn on_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    pub fn publish_progress(mut self, enabled: bool) -> Self {
        self.publish_progress = enabled;
        self
    }
}

/// Point-in-time engine status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub scorer: String,
    pub stats: StatsSnapshot,
    pub thresholds: ThresholdConfig,
    pub config_version: u64,
    pub active_scans: usize,
    pub max_concurrent_scans: usize,
    pub notifications_dropped: u64,
    pub sink_dropped: u64,
}

/// Streaming scan engine
pub struct ScanEngine {
    config: EngineConfig,
    store: Arc<ConfigStore>,
    scorer: Arc<dyn Scorer>,
    stats: Arc<SessionStats>,
    bus: NotificationBus,
    sink: SinkDispatcher,
    permits: Arc<Semaphore>,
}

impl ScanEngine {
    pub fn new(
        config: EngineConfig,
        scorer: Arc<dyn Scorer>,
        sink: Arc<dyn ThreatSink>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let store = Arc::new(ConfigStore::from_config(&config)?);
        let sink = SinkDispatcher::spawn(sink, config.sink_capacity)?;

        tracing::info!(
            scorer = scorer.name(),
            chunk_size = config.streaming.chunk_size,
            window_size = config.streaming.window_size,
            threshold = config.thresholds.standard,
            early_termination = config.thresholds.early_termination_enabled,
            max_concurrent_scans = config.max_concurrent_scans,
            "Scan engine initialized"
        );

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_scans)),
            bus: NotificationBus::new(config.notification_capacity),
            stats: Arc::new(SessionStats::new()),
            store,
            scorer,
            sink,
            config,
        })
    }

    /// Run one scan over `source` to a terminal result.
    ///
    /// Never returns an error: faults become `ERROR` results and are
    /// reported like any other outcome.
    pub async fn scan<S>(&self, request: ScanRequest, source: S) -> ScanResult
    where
        S: ChunkSource,
    {
        // the session clock starts once a permit is held
        let _permit = match self.admit(&request.cancel).await {
            Ok(permit) => permit,
            Err(e) => return self.complete(self.open_session(&request).fail(e)),
        };
        let session = self.open_session(&request);

        let mut source = Capped::new(source, self.config.streaming.max_file_size);
        let result = session
            .run(
                &mut source,
                self.scorer.as_ref(),
                &request.cancel,
                self.chunk_timeout(),
            )
            .await;
        self.complete(result)
    }

    /// Scan an in-memory upload
    pub async fn scan_bytes(&self, request: ScanRequest, data: impl Into<Bytes>) -> ScanResult {
        let source = BytesChunkSource::new(data, self.config.streaming.chunk_size);
        self.scan(request, source).await
    }

    /// Scan a file on disk, reading it incrementally
    pub async fn scan_file(&self, request: ScanRequest, path: impl AsRef<Path>) -> ScanResult {
        match tokio::fs::File::open(path.as_ref()).await {
            Ok(file) => {
                let source = ReaderChunkSource::new(file, self.config.streaming.chunk_size);
                self.scan(request, source).await
            }
            Err(e) => {
                let session = self.open_session(&request);
                self.complete(session.fail(ScanError::Io(e)))
            }
        }
    }

    /// Stream and scan a URL
    #[cfg(feature = "http")]
    pub async fn scan_url(&self, request: ScanRequest) -> ScanResult {
        match crate::source::HttpChunkSource::new(&request.source, self.config.streaming.chunk_size) {
            Ok(source) => self.scan(request, source).await,
            Err(e) => {
                let session = self.open_session(&request);
                self.complete(session.fail(ScanError::ChunkSource(e)))
            }
        }
    }

    /// Classify fully-received items with size-dependent thresholds
    pub async fn analyze_batch(&self, items: Vec<BatchItem>) -> crate::Result<BatchAnalysis> {
        BatchClassifier::new(
            self.scorer.clone(),
            self.store.clone(),
            self.config.streaming.window_size,
        )
        .analyze(items)
        .await
    }

    fn open_session(&self, request: &ScanRequest) -> ScanSession {
        let session = ScanSession::new(
            request.source.clone(),
            request.source_type,
            self.config.streaming.window_size,
            self.store.clone(),
        )
        .with_early_termination(request.early_termination);

        let user_hook = request.progress.clone();
        let bus = request.publish_progress.then(|| self.bus.clone());
        if user_hook.is_none() && bus.is_none() {
            return session;
        }

        let scan_id = session.scan_id();
        let source = request.source.clone();
        let hook: ProgressHook = Arc::new(move |bytes_scanned, probability| {
            if let Some(hook) = &user_hook {
                hook(bytes_scanned, probability);
            }
            if let Some(bus) = &bus {
                bus.publish(ScanEvent::progress(scan_id, &source, bytes_scanned, probability));
            }
        });
        session.with_progress(hook)
    }

    async fn admit(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, ScanError> {
        let limit = self.config.max_concurrent_scans;
        match self.config.admission {
            AdmissionPolicy::Reject => self.permits.clone().try_acquire_owned().map_err(|_| {
                tracing::warn!(limit, "Scan rejected, engine at capacity");
                ScanError::Overloaded(limit)
            }),
            AdmissionPolicy::Wait => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ScanError::Cancelled),
                    permit = self.permits.clone().acquire_owned() => {
                        permit.map_err(|_| ScanError::Overloaded(limit))
                    }
                }
            }
        }
    }

    /// Stats first, then notifications, then the sink queue
    fn complete(&self, result: ScanResult) -> ScanResult {
        self.stats.record(&result);

        if result.blocked {
            self.bus.publish(ScanEvent::threat_detected(&result));
        }
        self.bus.publish(ScanEvent::scan_completed(&result));

        self.sink.submit(&result);
        result
    }

    /// Wait until every result completed so far has reached the sink
    pub async fn flush_sink(&self) {
        self.sink.flush().await;
    }

    fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.config.streaming.download_timeout_secs)
    }

    /// Subscribe to scan events
    pub fn subscribe(&self) -> mpsc::Receiver<ScanEvent> {
        self.bus.subscribe()
    }

    pub fn update_threshold(&self, threshold: f64) -> Result<ThresholdUpdate, ConfigError> {
        self.store.update_threshold(threshold)
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            scorer: self.scorer.name().to_string(),
            stats: self.stats.snapshot(),
            thresholds: self.store.thresholds(),
            config_version: self.store.version(),
            active_scans: self.config.max_concurrent_scans - self.permits.available_permits(),
            max_concurrent_scans: self.config.max_concurrent_scans,
            notifications_dropped: self.bus.dropped(),
            sink_dropped: self.sink.dropped(),
        }
    }
}
