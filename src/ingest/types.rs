// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::error::ProviderError;

/// Provider-agnostic shell every provider maps its payload into before the
/// normalizer sees it. Values are kept as delivered; validation happens later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProviderRecord {
    /// Human-readable handle used in run report error entries (e.g. `"#3"`).
    pub record_ref: String,
    pub native_id: Option<String>,
    pub payload: RawPayload,
}

impl RawProviderRecord {
    /// Publication or kick-off time, when present and RFC 3339.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = match &self.payload {
            RawPayload::Article { published_at, .. } => published_at.as_deref(),
            RawPayload::Result { kickoff_at, .. } => kickoff_at.as_deref(),
        }?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawPayload {
    Article {
        title: Option<String>,
        body: Option<String>,
        published_at: Option<String>,
        url: Option<String>,
        image_url: Option<String>,
        image_alt: Option<String>,
        /// Publishing outlet, e.g. "Globo Esporte".
        source_name: Option<String>,
    },
    Result {
        home: RawTeam,
        away: RawTeam,
        home_score: Option<String>,
        away_score: Option<String>,
        /// Provider status mapped to a coarse state; only `Finished` is ingested.
        status: MatchStatus,
        kickoff_at: Option<String>,
        competition: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTeam {
    pub id: Option<String>,
    pub name: Option<String>,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Article,
    MatchResult,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Article => "article",
            ContentKind::MatchResult => "match_result",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Home,
    Away,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub alt_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub opponent: String,
    pub score_for: u32,
    pub score_against: u32,
    pub outcome: Outcome,
    pub venue: Venue,
    pub competition: Option<String>,
}

/// Canonical, persisted content record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub natural_key: String,
    pub kind: ContentKind,
    pub title: String,
    pub body: Option<String>,
    pub published_at: DateTime<Utc>,
    pub media: Option<Media>,
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_name: Option<String>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none", default)]
    pub match_details: Option<MatchDetails>,
    pub source_provider: String,
    pub ingested_at: DateTime<Utc>,
    pub content_hash: String,
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawProviderRecord>, ProviderError>;
    fn name(&self) -> &str;
}
