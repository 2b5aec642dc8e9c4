//! OpenSASE StreamScan
//!
//! Streaming malware verdict engine. Classifies a download or upload while it
//! is still arriving so delivery can be blocked before the transfer completes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       STREAMSCAN ENGINE                             │
//! │                                                                     │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐             │
//! │  │ Chunk Source │──▶│Sliding Window│──▶│    Scorer    │             │
//! │  │ (URL / File) │   │  (last N B)  │   │  (external)  │             │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘             │
//! │                                               │ probability         │
//! │                     ┌─────────────────────────▼──────────────────┐  │
//! │                     │  Threshold Policy  (early ▸ standard)      │  │
//! │                     └─────────────────────────┬──────────────────┘  │
//! │                                               │ decision            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────▼───────┐             │
//! │  │ Notification │◀──│ Session Stats│◀──│ Scan Session │──▶ Sink     │
//! │  │     Bus      │   │ (one lock)   │   │ (state mach.)│             │
//! │  └──────────────┘   └──────────────┘   └──────────────┘             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Thresholds and the risk table are hot-swappable through [`ConfigStore`];
//! every chunk reads one consistent snapshot.

pub mod batch;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod notify;
pub mod policy;
pub mod result;
pub mod risk;
pub mod scorer;
pub mod session;
pub mod sink;
pub mod source;
pub mod stats;

pub use batch::{BatchAnalysis, BatchClassifier, BatchItem, BatchSummary, ItemVerdict};
pub use buffer::SlidingWindowBuffer;
pub use config::{
    AdmissionPolicy, ConfigError, ConfigStore, EngineConfig, RiskThresholds, StreamingConfig,
    ThresholdConfig, ThresholdUpdate,
};
pub use engine::{EngineStatus, ScanEngine, ScanRequest};
pub use notify::{EventPayload, EventType, NotificationBus, ScanEvent};
pub use policy::{dynamic_threshold, Decision, ThresholdPolicy};
pub use result::{FaultKind, ScanDetails, ScanFault, ScanResult, ScanStatus, SourceType};
pub use risk::{RiskBand, RiskLevel, RiskTable};
pub use scorer::{shannon_entropy, EntropyScorer, Scorer, ScorerError};
pub use session::{ProgressHook, ScanSession, SessionState, Step};
pub use sink::{
    CompositeSink, InMemoryThreatLog, SinkDispatcher, SinkError, ThreatSink, TracingThreatSink,
};
pub use source::{BytesChunkSource, Capped, ChunkSource, ReaderChunkSource, SourceError, SourceSignal};
pub use stats::{SessionStats, StatsSnapshot};

#[cfg(feature = "http")]
pub use source::HttpChunkSource;

use thiserror::Error;

/// StreamScan errors
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid probability: {0} (expected a value in [0, 1])")]
    InvalidProbability(f64),

    #[error("scorer fault: {0}")]
    Scorer(#[from] ScorerError),

    #[error("chunk source fault: {0}")]
    ChunkSource(#[from] SourceError),

    #[error("timed out after {0}s waiting for the next chunk")]
    Timeout(u64),

    #[error("scan cancelled")]
    Cancelled,

    #[error("engine at capacity ({0} concurrent scans)")]
    Overloaded(usize),

    #[error("batch contains no items")]
    EmptyBatch,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
