// src/ingest/error.rs
//! Error taxonomy of the ingestion pipeline. None of these cross the
//! orchestrator boundary; they end up as entries in the run report.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport error or timeout that survived every retry.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected credentials: {0}")]
    Auth(String),
    #[error("provider returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Stable short code for report entries and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "provider-unavailable",
            ProviderError::Auth(_) => "provider-auth-error",
            ProviderError::MalformedResponse(_) => "provider-malformed-response",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ProviderError::Unavailable(d)
            | ProviderError::Auth(d)
            | ProviderError::MalformedResponse(d) => d,
        }
    }

    /// `code: detail`, the form used in run report entries.
    pub fn report_reason(&self) -> String {
        format!("{}: {}", self.code(), self.detail())
    }
}

/// Why the normalizer refused a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingId,
    MissingTitle,
    MissingBody,
    MissingTeam,
    MissingScore,
    InvalidScore,
    MissingPublishedAt,
    InvalidPublishedAt,
    UnknownTeam,
    AmbiguousTeam,
    /// Fixture not played yet; dropped quietly.
    NotFinished,
    /// Article never mentions the tracked team; dropped quietly.
    Irrelevant,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingId => "missing-id",
            RejectReason::MissingTitle => "missing-title",
            RejectReason::MissingBody => "missing-body",
            RejectReason::MissingTeam => "missing-team",
            RejectReason::MissingScore => "missing-score",
            RejectReason::InvalidScore => "invalid-score",
            RejectReason::MissingPublishedAt => "missing-published-at",
            RejectReason::InvalidPublishedAt => "invalid-published-at",
            RejectReason::UnknownTeam => "unknown-team",
            RejectReason::AmbiguousTeam => "ambiguous-team",
            RejectReason::NotFinished => "not-finished",
            RejectReason::Irrelevant => "irrelevant",
        }
    }

    /// Filter reasons are counted, not reported as errors.
    pub fn is_filter(&self) -> bool {
        matches!(self, RejectReason::NotFinished | RejectReason::Irrelevant)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record {record_ref} rejected: {reason}")]
pub struct RecordRejected {
    pub record_ref: String,
    pub reason: RejectReason,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store write failed for {key}: {message}")]
    WriteFailed { key: String, message: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0} ms")]
    Timeout(u64),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::WriteFailed { .. } => "store-write-failed",
            StoreError::Unavailable(_) => "store-unavailable",
            StoreError::Timeout(_) => "store-timeout",
        }
    }
}

/// Why a pipeline could not be assembled for a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ingest configuration unavailable: {0}")]
    Unavailable(String),
    #[error("missing secret {0}")]
    MissingSecret(&'static str),
    #[error("no enabled providers configured")]
    NoProviders,
}
