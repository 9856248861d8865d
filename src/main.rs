//! matchday-ingest — server entrypoint.
//! Boots the Axum router with the cron trigger, health and debug routes.

use std::sync::Arc;

use matchday_ingest::api::{self, AppState};
use matchday_ingest::config::ingest::ENV_CRON_SECRET;
use matchday_ingest::history::RunHistory;
use matchday_ingest::ingest::pipeline::{ConfigPipeline, PipelineBuilder};
use matchday_ingest::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use matchday_ingest::metrics::Metrics;
use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;

/// Interval for the in-process scheduler; unset leaves triggering to the external cron.
const ENV_INTERVAL_SECS: &str = "INGEST_INTERVAL_SECS";
const ENV_DEBUG_ROUTES: &str = "DEBUG_ROUTES";

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    matchday_ingest::init_tracing("matchday_ingest=info,ingest=info,warn");

    // A missing or broken config does not stop the server: triggers answer 500.
    let pipeline = ConfigPipeline::load_default();
    let budget_secs = pipeline.config().map(|c| c.budget_secs).unwrap_or(50);
    let history = Arc::new(RunHistory::with_capacity(
        pipeline.config().map(|c| c.history_capacity).unwrap_or(50),
    ));
    let secret = pipeline
        .config()
        .and_then(|c| c.cron_secret.clone())
        .or_else(|| std::env::var(ENV_CRON_SECRET).ok().filter(|s| !s.is_empty()));
    if secret.is_none() {
        tracing::warn!("{ENV_CRON_SECRET} not set; every trigger will fail");
    }

    let builder: Arc<dyn PipelineBuilder> = Arc::new(pipeline);
    let state = AppState::new(secret, builder.clone()).with_history(history.clone());

    if let Some(interval_secs) = std::env::var(ENV_INTERVAL_SECS)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        tracing::info!(interval_secs, "starting in-process ingest scheduler");
        spawn_scheduler(
            IngestSchedulerCfg { interval_secs },
            builder,
            history,
            state.run_guard.clone(),
            CancellationToken::new(),
        );
    }

    let mut router = api::router(state);
    match Metrics::init(budget_secs) {
        Ok(metrics) if std::env::var(ENV_DEBUG_ROUTES).is_ok_and(|v| v == "1") => {
            router = router.merge(metrics.router());
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "metrics recorder not installed"),
    }

    Ok(router.into())
}
