//! Output formatting

use clap::ValueEnum;
use colored::Colorize;
use sase_streamscan::{BatchAnalysis, ScanResult, ScanStatus};
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn print<T: Serialize>(&self, data: &T) {
        match self {
            OutputFormat::Json | OutputFormat::Table => {
                println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
            }
            OutputFormat::Yaml => {
                println!("{}", serde_yaml::to_string(data).unwrap_or_default());
            }
        }
    }

    pub fn print_results(&self, results: &[ScanResult]) {
        match self {
            OutputFormat::Table => {
                let rows: Vec<ResultRow> = results.iter().map(ResultRow::from).collect();
                println!("{}", Table::new(rows));
            }
            _ => self.print(&results),
        }
    }

    pub fn print_batch(&self, analysis: &BatchAnalysis) {
        match self {
            OutputFormat::Table => {
                let rows: Vec<BatchRow> = analysis
                    .items
                    .iter()
                    .map(|v| BatchRow {
                        item: v.name.clone(),
                        size: v.size,
                        probability: format!("{:.4}", v.probability),
                        threshold: format!("{:.4}", v.threshold),
                        verdict: if v.malicious {
                            "MALICIOUS".red().bold().to_string()
                        } else {
                            "benign".green().to_string()
                        },
                    })
                    .collect();
                println!("{}", Table::new(rows));
                let s = &analysis.summary;
                println!(
                    "{} of {} malicious ({:.1}%), level {}, thresholds {:.3}..{:.3}",
                    s.malicious,
                    s.total,
                    s.malicious_ratio * 100.0,
                    s.level,
                    analysis.threshold_range.0,
                    analysis.threshold_range.1,
                );
            }
            _ => self.print(analysis),
        }
    }
}

#[derive(Tabled)]
struct ResultRow {
    source: String,
    status: String,
    risk: String,
    probability: String,
    bytes: u64,
    early: bool,
    #[tabled(rename = "time (ms)")]
    time_ms: String,
}

impl From<&ScanResult> for ResultRow {
    fn from(r: &ScanResult) -> Self {
        let status = match r.status {
            ScanStatus::ThreatDetected => r.status.to_string().red().bold().to_string(),
            ScanStatus::Clean => r.status.to_string().green().to_string(),
            ScanStatus::Error => r.status.to_string().yellow().to_string(),
        };
        Self {
            source: r.source.clone(),
            status,
            risk: r.risk_level.to_string(),
            probability: format!("{:.4}", r.probability),
            bytes: r.bytes_scanned,
            early: r.details.early_termination,
            time_ms: format!("{:.1}", r.scan_time_ms),
        }
    }
}

#[derive(Tabled)]
struct BatchRow {
    item: String,
    size: usize,
    probability: String,
    threshold: String,
    verdict: String,
}
