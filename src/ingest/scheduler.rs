// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::history::RunHistory;
use crate::ingest::pipeline::{PipelineBuilder, RunGuard};

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
}

/// Local stand-in for the external cron: triggers a run every `interval_secs`
/// until `shutdown` fires. Ticks that find a run in progress are skipped.
pub fn spawn_scheduler(
    cfg: IngestSchedulerCfg,
    builder: Arc<dyn PipelineBuilder>,
    history: Arc<RunHistory>,
    guard: RunGuard,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Ok(_running) = guard.try_lock() else {
                tracing::info!(target: "ingest", "scheduled tick skipped: run in progress");
                continue;
            };
            let pipeline = match builder.build() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, "scheduled run not started");
                    continue;
                }
            };
            let report = pipeline.run().await;
            tracing::info!(
                target: "ingest",
                created = report.total_created(),
                updated = report.total_updated(),
                degraded = report.is_degraded(),
                "scheduled ingest tick"
            );
            history.push(report);
        }
    })
}
