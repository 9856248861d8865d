// src/ingest/normalize.rs
//! Raw provider records → canonical `ContentItem`.
//!
//! Everything here is a pure function of its inputs: the only timestamp that
//! enters an item is the `ingested_at` handed in by the caller, and it is
//! excluded from both the natural key and the content hash.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::TrackedTeamConfig;
use crate::ingest::clean_text;
use crate::ingest::error::{RecordRejected, RejectReason};
use crate::ingest::types::{
    ContentItem, ContentKind, MatchDetails, MatchStatus, Media, Outcome, RawPayload,
    RawProviderRecord, RawTeam, Venue,
};

const TITLE_MAX_CHARS: usize = 300;
const BODY_MAX_CHARS: usize = 5_000;
const NATIVE_ID_MAX_CHARS: usize = 64;

/// `Win` iff `score_for > score_against`, `Loss` iff lower, otherwise `Draw`.
pub fn classify_outcome(score_for: u32, score_against: u32) -> Outcome {
    use std::cmp::Ordering;
    match score_for.cmp(&score_against) {
        Ordering::Greater => Outcome::Win,
        Ordering::Less => Outcome::Loss,
        Ordering::Equal => Outcome::Draw,
    }
}

/// Key prefix for a provider name: lowercased, whitespace runs joined by `-`.
/// Two providers with the same slug would share keys.
pub fn provider_slug(provider: &str) -> String {
    provider
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Deterministic key from provider name + provider-native id.
///
/// Short URL-safe ids are kept verbatim (`api-football:134287`); anything else
/// (article URLs, ids with spaces) is replaced by a 16-hex SHA-256 prefix.
pub fn natural_key(provider: &str, native_id: &str) -> String {
    let slug = provider_slug(provider);
    let id = native_id.trim();
    let verbatim = !id.is_empty()
        && id.chars().count() <= NATIVE_ID_MAX_CHARS
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if verbatim {
        format!("{slug}:{id}")
    } else {
        let digest = Sha256::digest(id.as_bytes());
        let hex = format!("{:x}", digest);
        format!("{slug}:{}", &hex[..16])
    }
}

#[derive(Serialize)]
struct HashedFields<'a> {
    natural_key: &'a str,
    kind: ContentKind,
    title: &'a str,
    body: Option<&'a str>,
    published_at: String,
    media: Option<&'a Media>,
    source_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_name: Option<&'a str>,
    match_details: Option<&'a MatchDetails>,
    source_provider: &'a str,
}

/// SHA-256 over every persisted field except `ingested_at`.
pub fn content_hash(item: &ContentItem) -> String {
    let fields = HashedFields {
        natural_key: &item.natural_key,
        kind: item.kind,
        title: &item.title,
        body: item.body.as_deref(),
        published_at: item.published_at.to_rfc3339(),
        media: item.media.as_ref(),
        source_url: item.source_url.as_deref(),
        source_name: item.source_name.as_deref(),
        match_details: item.match_details.as_ref(),
        source_provider: &item.source_provider,
    };
    let bytes = serde_json::to_vec(&fields).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

/// The club whose results are ingested.
#[derive(Debug, Clone)]
pub struct TrackedTeam {
    name: String,
    names: Vec<String>,
    ids: HashMap<String, String>,
    keywords: Vec<String>,
}

impl TrackedTeam {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            names: vec![fold_name(name)],
            ids: HashMap::new(),
            keywords: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        let folded = fold_name(alias);
        if !folded.is_empty() && !self.names.contains(&folded) {
            self.names.push(folded);
        }
        self
    }

    /// Provider-native id; when both sides carry ids, ids decide instead of names.
    pub fn with_provider_id(mut self, provider: &str, id: &str) -> Self {
        self.ids
            .insert(provider.trim().to_ascii_lowercase(), id.trim().to_string());
        self
    }

    pub fn with_keyword(mut self, keyword: &str) -> Self {
        let k = keyword.trim().to_lowercase();
        if !k.is_empty() {
            self.keywords.push(k);
        }
        self
    }

    pub fn from_config(cfg: &TrackedTeamConfig) -> Self {
        let mut team = Self::new(&cfg.name);
        for alias in &cfg.aliases {
            team = team.with_alias(alias);
        }
        for (provider, id) in &cfg.ids {
            team = team.with_provider_id(provider, id);
        }
        for kw in &cfg.keywords {
            team = team.with_keyword(kw);
        }
        team
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is(&self, provider: &str, team: &RawTeam) -> bool {
        let configured = self.ids.get(&provider.trim().to_ascii_lowercase());
        if let (Some(want), Some(got)) = (configured, team.id.as_deref()) {
            return want == got.trim();
        }
        team.name
            .as_deref()
            .map(fold_name)
            .is_some_and(|n| self.names.contains(&n))
    }

    fn mentioned_in(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

fn fold_name(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Output of `Normalizer::normalize_batch`: accepted items plus rejections in input order.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub items: Vec<ContentItem>,
    pub rejected: Vec<RecordRejected>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    team: TrackedTeam,
}

impl Normalizer {
    pub fn new(team: TrackedTeam) -> Self {
        Self { team }
    }

    pub fn team(&self) -> &TrackedTeam {
        &self.team
    }

    pub fn normalize(
        &self,
        record: &RawProviderRecord,
        provider: &str,
        ingested_at: DateTime<Utc>,
    ) -> Result<ContentItem, RecordRejected> {
        let reject = |reason| RecordRejected {
            record_ref: record.record_ref.clone(),
            reason,
        };

        if let RawPayload::Result { status, .. } = &record.payload {
            if *status != MatchStatus::Finished {
                return Err(reject(RejectReason::NotFinished));
            }
        }

        let native_id = record
            .native_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| reject(RejectReason::MissingId))?;
        let key = natural_key(provider, native_id);

        let mut item = match &record.payload {
            RawPayload::Article {
                title,
                body,
                published_at,
                url,
                image_url,
                image_alt,
                source_name,
            } => {
                let title = required_text(title.as_deref(), TITLE_MAX_CHARS)
                    .ok_or_else(|| reject(RejectReason::MissingTitle))?;
                let body = required_text(body.as_deref(), BODY_MAX_CHARS)
                    .ok_or_else(|| reject(RejectReason::MissingBody))?;
                let published_at = parse_timestamp(published_at.as_deref()).map_err(reject)?;

                if !self.team.mentioned_in(&title) && !self.team.mentioned_in(&body) {
                    return Err(reject(RejectReason::Irrelevant));
                }

                let media = non_empty(image_url.as_deref()).map(|url| Media {
                    url,
                    alt_text: non_empty(image_alt.as_deref()).unwrap_or_else(|| title.clone()),
                });

                ContentItem {
                    natural_key: key,
                    kind: ContentKind::Article,
                    title,
                    body: Some(body),
                    published_at,
                    media,
                    source_url: non_empty(url.as_deref()),
                    source_name: non_empty(source_name.as_deref()),
                    match_details: None,
                    source_provider: provider.to_string(),
                    ingested_at,
                    content_hash: String::new(),
                }
            }
            RawPayload::Result {
                home,
                away,
                home_score,
                away_score,
                kickoff_at,
                competition,
                ..
            } => {
                let home_name = required_text(home.name.as_deref(), TITLE_MAX_CHARS)
                    .ok_or_else(|| reject(RejectReason::MissingTeam))?;
                let away_name = required_text(away.name.as_deref(), TITLE_MAX_CHARS)
                    .ok_or_else(|| reject(RejectReason::MissingTeam))?;
                let home_goals = parse_score(home_score.as_deref()).map_err(reject)?;
                let away_goals = parse_score(away_score.as_deref()).map_err(reject)?;

                let venue = match (self.team.is(provider, home), self.team.is(provider, away)) {
                    (true, false) => Venue::Home,
                    (false, true) => Venue::Away,
                    (true, true) => return Err(reject(RejectReason::AmbiguousTeam)),
                    (false, false) => return Err(reject(RejectReason::UnknownTeam)),
                };
                let (opponent, opponent_logo, score_for, score_against) = match venue {
                    Venue::Home => (away_name.clone(), away.logo.as_deref(), home_goals, away_goals),
                    Venue::Away => (home_name.clone(), home.logo.as_deref(), away_goals, home_goals),
                };
                let published_at = parse_timestamp(kickoff_at.as_deref()).map_err(reject)?;

                ContentItem {
                    natural_key: key,
                    kind: ContentKind::MatchResult,
                    title: format!("{home_name} {home_goals} x {away_goals} {away_name}"),
                    body: None,
                    published_at,
                    media: non_empty(opponent_logo).map(|url| Media {
                        url,
                        alt_text: opponent.clone(),
                    }),
                    source_url: None,
                    source_name: None,
                    match_details: Some(MatchDetails {
                        opponent,
                        score_for,
                        score_against,
                        outcome: classify_outcome(score_for, score_against),
                        venue,
                        competition: non_empty(competition.as_deref()),
                    }),
                    source_provider: provider.to_string(),
                    ingested_at,
                    content_hash: String::new(),
                }
            }
        };

        item.content_hash = content_hash(&item);
        Ok(item)
    }

    /// A rejected record never stops its siblings.
    pub fn normalize_batch(
        &self,
        records: &[RawProviderRecord],
        provider: &str,
        ingested_at: DateTime<Utc>,
    ) -> NormalizedBatch {
        let mut out = NormalizedBatch::default();
        for record in records {
            match self.normalize(record, provider, ingested_at) {
                Ok(item) => out.items.push(item),
                Err(rejected) => out.rejected.push(rejected),
            }
        }
        out
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn required_text(s: Option<&str>, max_chars: usize) -> Option<String> {
    s.map(|v| clean_text(v, max_chars)).filter(|v| !v.is_empty())
}

fn parse_score(s: Option<&str>) -> Result<u32, RejectReason> {
    let raw = s
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(RejectReason::MissingScore)?;
    raw.parse::<u32>().map_err(|_| RejectReason::InvalidScore)
}

fn parse_timestamp(s: Option<&str>) -> Result<DateTime<Utc>, RejectReason> {
    let raw = s
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(RejectReason::MissingPublishedAt)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RejectReason::InvalidPublishedAt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 12, 22, 0, 0).unwrap()
    }

    fn team(id: Option<&str>, name: &str) -> RawTeam {
        RawTeam {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            logo: Some(format!("https://img.test/{name}.png")),
        }
    }

    fn result(id: &str, home: RawTeam, away: RawTeam, hs: &str, aw: &str) -> RawProviderRecord {
        RawProviderRecord {
            record_ref: format!("#{id}"),
            native_id: Some(id.to_string()),
            payload: RawPayload::Result {
                home,
                away,
                home_score: Some(hs.to_string()),
                away_score: Some(aw.to_string()),
                status: MatchStatus::Finished,
                kickoff_at: Some("2025-05-11T21:30:00+00:00".to_string()),
                competition: Some("Serie A".to_string()),
            },
        }
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(TrackedTeam::new("Flamengo").with_alias("CR Flamengo"))
    }

    #[test]
    fn outcome_follows_score_comparison() {
        assert_eq!(classify_outcome(3, 1), Outcome::Win);
        assert_eq!(classify_outcome(0, 0), Outcome::Draw);
        assert_eq!(classify_outcome(1, 2), Outcome::Loss);
        assert_eq!(classify_outcome(u32::MAX, u32::MAX), Outcome::Draw);
    }

    #[test]
    fn natural_key_keeps_short_ids_and_hashes_urls() {
        assert_eq!(natural_key("api-football", "134287"), "api-football:134287");
        assert_eq!(natural_key("News API", " abc "), "news-api:abc");
        let k = natural_key("news-api", "https://example.test/a?b=1");
        assert!(k.starts_with("news-api:"));
        assert_eq!(k.len(), "news-api:".len() + 16);
        assert_eq!(k, natural_key("news-api", "https://example.test/a?b=1"));
    }

    #[test]
    fn away_win_is_scored_from_tracked_side() {
        let rec = result("9", team(None, "Vasco"), team(None, "flamengo"), "1", "3");
        let item = normalizer().normalize(&rec, "api-football", at()).unwrap();
        let m = item.match_details.unwrap();
        assert_eq!(m.venue, Venue::Away);
        assert_eq!((m.score_for, m.score_against), (3, 1));
        assert_eq!(m.outcome, Outcome::Win);
        assert_eq!(m.opponent, "Vasco");
        assert_eq!(item.title, "Vasco 1 x 3 flamengo");
    }

    #[test]
    fn provider_id_decides_over_name() {
        let n = Normalizer::new(TrackedTeam::new("Flamengo").with_provider_id("api-football", "127"));
        // Same display name on both sides, ids tell them apart.
        let rec = result(
            "10",
            team(Some("127"), "Flamengo"),
            team(Some("9999"), "Flamengo"),
            "2",
            "2",
        );
        let item = n.normalize(&rec, "api-football", at()).unwrap();
        assert_eq!(item.match_details.unwrap().venue, Venue::Home);
    }

    #[test]
    fn unknown_and_ambiguous_teams_are_rejected() {
        let n = normalizer();
        let unknown = result("1", team(None, "Vasco"), team(None, "Botafogo"), "1", "0");
        assert_eq!(
            n.normalize(&unknown, "p", at()).unwrap_err().reason,
            RejectReason::UnknownTeam
        );
        let both = result("2", team(None, "Flamengo"), team(None, "CR  Flamengo"), "1", "0");
        assert_eq!(
            n.normalize(&both, "p", at()).unwrap_err().reason,
            RejectReason::AmbiguousTeam
        );
    }

    #[test]
    fn negative_and_non_numeric_scores_are_invalid() {
        let n = normalizer();
        for bad in ["-1", "two", "1.5"] {
            let rec = result("3", team(None, "Flamengo"), team(None, "Vasco"), bad, "0");
            assert_eq!(
                n.normalize(&rec, "p", at()).unwrap_err().reason,
                RejectReason::InvalidScore
            );
        }
    }

    #[test]
    fn scheduled_fixture_is_filtered() {
        let mut rec = result("4", team(None, "Flamengo"), team(None, "Vasco"), "", "");
        if let RawPayload::Result { status, .. } = &mut rec.payload {
            *status = MatchStatus::Scheduled;
        }
        let err = normalizer().normalize(&rec, "p", at()).unwrap_err();
        assert!(err.reason.is_filter());
    }

    #[test]
    fn hash_ignores_ingested_at_but_tracks_fields() {
        let n = normalizer();
        let rec = result("5", team(None, "Flamengo"), team(None, "Vasco"), "2", "0");
        let a = n.normalize(&rec, "p", at()).unwrap();
        let b = n.normalize(&rec, "p", Utc::now()).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.natural_key, b.natural_key);

        let changed = result("5", team(None, "Flamengo"), team(None, "Vasco"), "2", "1");
        let c = n.normalize(&changed, "p", at()).unwrap();
        assert_eq!(a.natural_key, c.natural_key);
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[test]
    fn article_requires_title_body_and_timestamp() {
        let n = normalizer();
        let article = |title: Option<&str>, body: Option<&str>, ts: Option<&str>| RawProviderRecord {
            record_ref: "#a".into(),
            native_id: Some("https://news.test/a".into()),
            payload: RawPayload::Article {
                title: title.map(Into::into),
                body: body.map(Into::into),
                published_at: ts.map(Into::into),
                url: Some("https://news.test/a".into()),
                image_url: Some("https://img.test/a.jpg".into()),
                image_alt: None,
                source_name: None,
            },
        };
        let ts = Some("2025-05-12T10:00:00Z");

        let ok = n
            .normalize(&article(Some("<b>Flamengo</b> vence"), Some("Texto &amp; mais"), ts), "news-api", at())
            .unwrap();
        assert_eq!(ok.title, "Flamengo vence");
        assert_eq!(ok.body.as_deref(), Some("Texto & mais"));
        assert_eq!(ok.media.unwrap().alt_text, "Flamengo vence");

        let reason = |r: RawProviderRecord| n.normalize(&r, "news-api", at()).unwrap_err().reason;
        assert_eq!(reason(article(None, Some("x"), ts)), RejectReason::MissingTitle);
        assert_eq!(reason(article(Some("x"), Some("  "), ts)), RejectReason::MissingBody);
        assert_eq!(reason(article(Some("x"), Some("y"), None)), RejectReason::MissingPublishedAt);
        assert_eq!(
            reason(article(Some("x"), Some("y"), Some("yesterday"))),
            RejectReason::InvalidPublishedAt
        );
    }

    #[test]
    fn keywords_filter_unrelated_articles() {
        let n = Normalizer::new(TrackedTeam::new("Flamengo").with_keyword("Flamengo").with_keyword("Mengão"));
        let rec = RawProviderRecord {
            record_ref: "#b".into(),
            native_id: Some("b".into()),
            payload: RawPayload::Article {
                title: Some("Palmeiras anuncia reforço".into()),
                body: Some("Nada sobre o rubro-negro".into()),
                published_at: Some("2025-05-12T10:00:00Z".into()),
                url: None,
                image_url: None,
                image_alt: None,
                source_name: None,
            },
        };
        assert_eq!(
            n.normalize(&rec, "news-api", at()).unwrap_err().reason,
            RejectReason::Irrelevant
        );
    }
}
