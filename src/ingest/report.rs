// src/ingest/report.rs
//! Run report: the always-returned summary of one ingestion run.
//!
//! Only the orchestrator loop mutates a `RunReport`; provider tasks describe
//! their progress with [`ProviderEvent`]s sent over a channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Pending,
    Fetching,
    Normalizing,
    Classifying,
    Writing,
    Done,
    Failed(String),
}

impl ProviderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderState::Done | ProviderState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub record_ref: String,
    pub reason: String,
}

impl RecordError {
    pub fn new(record_ref: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record_ref: record_ref.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReport {
    pub state: ProviderState,
    pub fetched: usize,
    pub normalized: usize,
    pub filtered: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
}

impl Default for ProviderReport {
    fn default() -> Self {
        Self {
            state: ProviderState::Pending,
            fetched: 0,
            normalized: 0,
            filtered: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub providers: BTreeMap<String, ProviderReport>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            timed_out: false,
            providers: BTreeMap::new(),
        }
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderReport> {
        self.providers.get(name)
    }

    /// True when anything short of a clean run happened.
    pub fn is_degraded(&self) -> bool {
        self.timed_out
            || self
                .providers
                .values()
                .any(|p| !p.errors.is_empty() || p.state != ProviderState::Done)
    }

    pub fn total_created(&self) -> usize {
        self.providers.values().map(|p| p.created).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.providers.values().map(|p| p.updated).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.providers.values().map(|p| p.errors.len()).sum()
    }

    pub(crate) fn apply(&mut self, ev: ProviderEvent) {
        let p = self.providers.entry(ev.provider).or_default();
        match ev.progress {
            Progress::State(s) => p.state = s,
            Progress::Fetched(n) => p.fetched += n,
            Progress::Normalized(n) => p.normalized += n,
            Progress::Filtered(n) => p.filtered += n,
            Progress::Created => p.created += 1,
            Progress::Updated => p.updated += 1,
            Progress::Skipped(n) => p.skipped += n,
            Progress::Error(e) => p.errors.push(e),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Progress {
    State(ProviderState),
    Fetched(usize),
    Normalized(usize),
    Filtered(usize),
    Created,
    Updated,
    Skipped(usize),
    Error(RecordError),
}

#[derive(Debug, Clone)]
pub(crate) struct ProviderEvent {
    pub provider: String,
    pub progress: Progress,
}
