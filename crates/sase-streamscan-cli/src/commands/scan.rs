//! Scan commands

use super::{build_engine, load_config};
use crate::{output::OutputFormat, ScanArgs};
use sase_streamscan::{InMemoryThreatLog, ScanEngine, ScanRequest, ScanResult};
use tokio_util::sync::CancellationToken;

/// Scan each file in turn. Returns whether anything was blocked.
pub async fn files(
    config: Option<&str>,
    paths: &[String],
    args: ScanArgs,
    format: OutputFormat,
) -> anyhow::Result<bool> {
    if paths.is_empty() {
        anyhow::bail!("no files given");
    }
    let (engine, log) = prepare(config, args)?;
    let cancel = interrupt_token();

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let request = ScanRequest::file(path.as_str())
            .early_termination(args.early_override())
            .cancel_token(cancel.clone());
        results.push(engine.scan_file(request, path).await);
    }

    Ok(report(&engine, &log, &results, format).await)
}

/// Stream one URL
pub async fn url(
    config: Option<&str>,
    url: &str,
    args: ScanArgs,
    format: OutputFormat,
) -> anyhow::Result<bool> {
    let (engine, log) = prepare(config, args)?;
    let request = ScanRequest::url(url)
        .early_termination(args.early_override())
        .cancel_token(interrupt_token());
    let result = engine.scan_url(request).await;

    Ok(report(&engine, &log, &[result], format).await)
}

fn prepare(
    config: Option<&str>,
    args: ScanArgs,
) -> anyhow::Result<(ScanEngine, std::sync::Arc<InMemoryThreatLog>)> {
    let config = load_config(config)?;
    let (engine, log) = build_engine(config)?;
    if let Some(threshold) = args.threshold {
        engine.update_threshold(threshold)?;
    }
    Ok((engine, log))
}

/// Ctrl-C cancels the scan in flight
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling scan");
            child.cancel();
        }
    });
    token
}

async fn report(
    engine: &ScanEngine,
    log: &InMemoryThreatLog,
    results: &[ScanResult],
    format: OutputFormat,
) -> bool {
    format.print_results(results);
    engine.flush_sink().await;

    if matches!(format, OutputFormat::Table) {
        let stats = engine.stats();
        println!(
            "{} scanned, {} blocked, {} clean, {} errors, {} bytes",
            stats.total_scans + stats.errored_scans,
            stats.threats_blocked,
            stats.clean_scans,
            stats.errored_scans,
            stats.total_bytes_scanned,
        );
        for (level, count) in log.distribution() {
            println!("  {level}: {count}");
        }
    }

    results.iter().any(|r| r.blocked)
}
