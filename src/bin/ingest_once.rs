//! Runs a single ingestion and prints the run report as JSON.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use matchday_ingest::config::ingest::TRIGGER_CEILING_SECS;
use matchday_ingest::config::IngestConfig;
use matchday_ingest::ingest::pipeline::{ConfigPipeline, PipelineBuilder};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to ingest.toml (defaults to $INGEST_CONFIG_PATH, then config/ingest.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the run budget in seconds
    #[arg(long)]
    budget_secs: Option<u64>,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,

    /// Exit non-zero when the run was degraded
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    matchday_ingest::init_tracing("matchday_ingest=info,ingest=info,warn");
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => IngestConfig::load_from(path)?,
        None => IngestConfig::load_default()?,
    };
    if let Some(b) = cli.budget_secs {
        if b == 0 || b >= TRIGGER_CEILING_SECS {
            return Err(anyhow!("--budget-secs must be between 1 and {}", TRIGGER_CEILING_SECS - 1));
        }
        cfg.budget_secs = b;
    }
    if cfg.store.url.is_none() {
        tracing::info!("no content store configured; writing to the in-memory store");
    }

    let pipeline = ConfigPipeline::new(cfg)
        .build()
        .context("building ingest pipeline")?;
    let report = pipeline.run().await;

    let out = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");

    if cli.strict && report.is_degraded() {
        return Err(anyhow!(
            "degraded run: {} error(s), timed_out = {}",
            report.total_errors(),
            report.timed_out
        ));
    }
    Ok(())
}
