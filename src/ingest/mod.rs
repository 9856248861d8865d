// src/ingest/mod.rs
pub mod client;
pub mod dedup;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod types;

pub use dedup::{Decision, Deduplicator};
pub use error::{ConfigError, ProviderError, RecordRejected, RejectReason, StoreError};
pub use normalize::{Normalizer, TrackedTeam};
pub use orchestrator::{KeyLocks, Orchestrator, OrchestratorSettings, ProviderJob};
pub use pipeline::{ConfigPipeline, Pipeline, PipelineBuilder};
pub use report::{ProviderReport, ProviderState, RecordError, RunReport};
pub use store::{ContentStore, MemoryStore, RestContentStore};
pub use types::{ContentItem, ContentKind, RawPayload, RawProviderRecord, SourceProvider};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Completed ingestion runs.");
        describe_counter!(
            "ingest_fetched_total",
            "Raw records fetched, per provider."
        );
        describe_counter!("ingest_created_total", "Content items created.");
        describe_counter!("ingest_updated_total", "Content items updated.");
        describe_counter!(
            "ingest_skipped_total",
            "Items skipped because their content hash did not change."
        );
        describe_counter!(
            "ingest_rejected_total",
            "Records rejected by the normalizer (filters excluded)."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors, by kind."
        );
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_histogram!("ingest_run_ms", "Wall time of a whole run in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when the last run finished.");
    });
}

/// Clean provider text: decode entities, strip tags, fold typographic quotes,
/// collapse whitespace, cap at `max_chars` characters.
pub fn clean_text(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect::<String>().trim_end().to_string();
    }
    out
}
