// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod accounts;
pub mod api;
pub mod config;
pub mod history;
pub mod ingest;
pub mod metrics;

pub use crate::api::{router, AppState};
pub use crate::ingest::{ConfigPipeline, Orchestrator, PipelineBuilder, RunReport};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` wins over `default_filter`;
/// `LOG_FORMAT=json` switches to JSON lines. Calling it twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .try_init();
}
