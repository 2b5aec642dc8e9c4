//! CLI Commands

pub mod batch;
pub mod config;
pub mod scan;

use anyhow::Context;
use sase_streamscan::{
    CompositeSink, EngineConfig, EntropyScorer, InMemoryThreatLog, ScanEngine, ThreatSink,
    TracingThreatSink,
};
use std::sync::Arc;

/// File config (if any) with `STREAMSCAN_*` overrides applied
pub fn load_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path).with_context(|| format!("reading config {path}"))?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Engine with the heuristic scorer. Verdicts go to the log and to an
/// in-memory ring used for the run summary.
pub fn build_engine(config: EngineConfig) -> anyhow::Result<(ScanEngine, Arc<InMemoryThreatLog>)> {
    let log = Arc::new(InMemoryThreatLog::new(config.threat_log_capacity));
    let sinks: Vec<Arc<dyn ThreatSink>> = vec![Arc::new(TracingThreatSink), log.clone()];
    let engine = ScanEngine::new(
        config,
        Arc::new(EntropyScorer::new()),
        Arc::new(CompositeSink::new(sinks)),
    )?;
    Ok((engine, log))
}
