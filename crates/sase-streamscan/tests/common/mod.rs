//! Deterministic scorers and sources shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use sase_streamscan::{
    ChunkSource, EngineConfig, InMemoryThreatLog, ScanEngine, Scorer, ScorerError, SourceError,
    SourceSignal, ThreatSink,
};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Byte that makes [`ScriptedScorer::marker`] report a hit
pub const MARKER: u8 = 0xFF;
/// Byte that makes [`ScriptedScorer::faulty`] fail
pub const POISON: u8 = 0xEE;

type ScoreFn = dyn Fn(&[u8]) -> Result<f64, ScorerError> + Send + Sync;

/// Scorer driven by a pure function of the window
pub struct ScriptedScorer {
    f: Box<ScoreFn>,
}

impl ScriptedScorer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<f64, ScorerError> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }

    pub fn constant(p: f64) -> Self {
        Self::new(move |_| Ok(p))
    }

    /// `hit` when the window holds [`MARKER`], `miss` otherwise
    pub fn marker(hit: f64, miss: f64) -> Self {
        Self::new(move |w| Ok(if w.contains(&MARKER) { hit } else { miss }))
    }

    /// Marker scorer that faults on [`POISON`]
    pub fn faulty(hit: f64) -> Self {
        Self::new(move |w| {
            if w.contains(&POISON) {
                Err(ScorerError::Backend("inference crashed".into()))
            } else if w.contains(&MARKER) {
                Ok(hit)
            } else {
                Ok(0.05)
            }
        })
    }
}

#[async_trait]
impl Scorer for ScriptedScorer {
    async fn score(&self, window: &[u8]) -> Result<f64, ScorerError> {
        (self.f)(window)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Never yields a chunk
pub struct StalledSource;

#[async_trait]
impl ChunkSource for StalledSource {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        std::future::pending().await
    }
}

/// Waits for the gate to open, then ends the stream
pub struct GatedSource {
    gate: Option<oneshot::Receiver<()>>,
}

impl GatedSource {
    pub fn new() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { gate: Some(rx) }, tx)
    }
}

#[async_trait]
impl ChunkSource for GatedSource {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.await;
        }
        Ok(SourceSignal::Exhausted)
    }
}

/// Fails on the first read
pub struct BrokenSource;

#[async_trait]
impl ChunkSource for BrokenSource {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        Err(SourceError::Status(502))
    }
}

/// Yields `chunks` zero-filled chunks, then drops the connection
pub struct FaultAfterSource {
    remaining: usize,
    chunk_size: usize,
}

impl FaultAfterSource {
    pub fn new(chunks: usize, chunk_size: usize) -> Self {
        Self {
            remaining: chunks,
            chunk_size,
        }
    }
}

#[async_trait]
impl ChunkSource for FaultAfterSource {
    async fn next_chunk(&mut self) -> Result<SourceSignal, SourceError> {
        if self.remaining == 0 {
            return Err(SourceError::Http("connection reset by peer".into()));
        }
        self.remaining -= 1;
        Ok(SourceSignal::Chunk(Bytes::from(vec![0u8; self.chunk_size])))
    }
}

pub fn engine(config: EngineConfig, scorer: ScriptedScorer) -> (Arc<ScanEngine>, Arc<InMemoryThreatLog>) {
    let log = Arc::new(InMemoryThreatLog::new(1000));
    let engine = engine_with_sink(config, scorer, log.clone());
    (engine, log)
}

pub fn engine_with_sink(
    config: EngineConfig,
    scorer: ScriptedScorer,
    sink: Arc<dyn ThreatSink>,
) -> Arc<ScanEngine> {
    Arc::new(ScanEngine::new(config, Arc::new(scorer), sink).expect("valid config"))
}

/// `len` zero bytes with [`MARKER`] written from `at` to the end
pub fn payload(len: usize, at: Option<usize>) -> Vec<u8> {
    let mut data = vec![0u8; len];
    if let Some(at) = at {
        data[at..].fill(MARKER);
    }
    data
}
