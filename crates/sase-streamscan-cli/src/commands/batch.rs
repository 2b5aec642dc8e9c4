//! Batch command

use super::{build_engine, load_config};
use crate::output::OutputFormat;
use anyhow::Context;
use sase_streamscan::BatchItem;

pub async fn handle(config: Option<&str>, paths: &[String], format: OutputFormat) -> anyhow::Result<bool> {
    let config = load_config(config)?;
    let (engine, _) = build_engine(config)?;

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {path}"))?;
        items.push(BatchItem::new(path.as_str(), data));
    }

    let analysis = engine.analyze_batch(items).await?;
    format.print_batch(&analysis);
    Ok(analysis.summary.malicious > 0)
}
