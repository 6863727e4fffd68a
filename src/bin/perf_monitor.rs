use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use thea_services::services::monitor::{generate_report, PerformanceMonitor};
use thea_services::utils::init_tracing;

/// Samples host load and RAG service latency, then writes a JSON report.
#[derive(Parser)]
#[command(name = "perf-monitor")]
#[command(version)]
struct Args {
    /// Seconds between samples
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Total monitoring time in minutes
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Base URL of the RAG service
    #[arg(long, default_value = "http://localhost:8001")]
    base_url: String,

    /// Report file (defaults to rag_performance_monitor_<timestamp>.json)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing("info");

    let mut monitor = PerformanceMonitor::new(args.base_url)?;
    monitor
        .run(
            Duration::from_secs(args.interval.max(1)),
            Duration::from_secs(args.duration * 60),
        )
        .await;

    match generate_report(monitor.samples()) {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("No metrics collected"),
    }
    let path = monitor.save_results(args.output)?;
    println!("Results saved to {}", path.display());
    Ok(())
}
