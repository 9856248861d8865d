// src/ingest/providers/api_football.rs
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::ProviderConfig;
use crate::ingest::client::{parse_json, FetchRequest, HttpFetcher, RetryPolicy};
use crate::ingest::error::ProviderError;
use crate::ingest::types::{MatchStatus, RawPayload, RawProviderRecord, RawTeam, SourceProvider};

pub const DEFAULT_BASE_URL: &str = "https://api-football-v1.p.rapidapi.com";
const RAPIDAPI_HOST: &str = "api-football-v1.p.rapidapi.com";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    /// `[]` when fine, `{"token": "..."}` and friends otherwise.
    #[serde(default)]
    errors: Value,
    response: Option<Vec<T>>,
}

#[derive(Debug, Deserialize)]
struct FixtureInfo {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    status: Option<FixtureStatus>,
}

#[derive(Debug, Deserialize)]
struct FixtureStatus {
    #[serde(default)]
    short: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct League {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Team {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    logo: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Teams {
    #[serde(default)]
    home: Team,
    #[serde(default)]
    away: Team,
}

#[derive(Debug, Default, Deserialize)]
struct Goals {
    #[serde(default)]
    home: Value,
    #[serde(default)]
    away: Value,
}

/// One entry of `/v3/fixtures`.
#[derive(Debug, Deserialize)]
pub struct ApiFootballFixture {
    fixture: FixtureInfo,
    #[serde(default)]
    league: League,
    #[serde(default)]
    teams: Teams,
    #[serde(default)]
    goals: Goals,
}

#[derive(Debug, Deserialize)]
struct TeamEntry {
    team: Team,
}

/// JSON scalar as delivered, `None` for null. Non-scalars keep their JSON text
/// so the normalizer reports them as invalid instead of missing.
fn scalar(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn map_status(short: Option<&str>) -> MatchStatus {
    match short.unwrap_or_default() {
        "FT" | "AET" | "PEN" => MatchStatus::Finished,
        "TBD" | "NS" | "PST" => MatchStatus::Scheduled,
        "1H" | "HT" | "2H" | "ET" | "BT" | "P" | "SUSP" | "INT" | "LIVE" => MatchStatus::Live,
        _ => MatchStatus::Unknown,
    }
}

impl Team {
    fn into_raw(self) -> RawTeam {
        RawTeam {
            id: scalar(&self.id),
            name: self.name,
            logo: self.logo,
        }
    }
}

impl ApiFootballFixture {
    fn into_record(self, index: usize) -> RawProviderRecord {
        let status = map_status(
            self.fixture
                .status
                .as_ref()
                .and_then(|s| s.short.as_deref()),
        );
        RawProviderRecord {
            record_ref: format!("#{}", index + 1),
            native_id: scalar(&self.fixture.id),
            payload: RawPayload::Result {
                home_score: scalar(&self.goals.home),
                away_score: scalar(&self.goals.away),
                home: self.teams.home.into_raw(),
                away: self.teams.away.into_raw(),
                status,
                kickoff_at: self.fixture.date,
                competition: self.league.name,
            },
        }
    }
}

fn check_errors(errors: &Value) -> Result<(), ProviderError> {
    let empty = match errors {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    };
    if empty {
        return Ok(());
    }
    let is_auth = errors
        .as_object()
        .is_some_and(|o| o.contains_key("token") || o.contains_key("access"));
    let msg = errors.to_string();
    Err(if is_auth {
        ProviderError::Auth(msg)
    } else {
        ProviderError::MalformedResponse(msg)
    })
}

fn parse_fixtures(body: &str) -> Result<Vec<RawProviderRecord>, ProviderError> {
    let t0 = std::time::Instant::now();
    let env: Envelope<ApiFootballFixture> = parse_json(body)?;
    check_errors(&env.errors)?;
    let out: Vec<_> = env
        .response
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, f)| f.into_record(i))
        .collect();
    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

/// Exact (case-insensitive) name match among the search hits.
fn pick_team_id(body: &str, wanted: &str) -> Result<u64, ProviderError> {
    let env: Envelope<TeamEntry> = parse_json(body)?;
    check_errors(&env.errors)?;
    env.response
        .unwrap_or_default()
        .into_iter()
        .find(|e| {
            e.team
                .name
                .as_deref()
                .is_some_and(|n| n.trim().eq_ignore_ascii_case(wanted.trim()))
        })
        .and_then(|e| e.team.id.as_u64())
        .ok_or_else(|| ProviderError::MalformedResponse(format!("team '{wanted}' not found")))
}

/// Resolved team id, shared by every provider instance built for the same config entry.
pub type TeamIdCache = Arc<OnceCell<u64>>;

pub struct ApiFootballProvider {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        fetcher: HttpFetcher,
        base_url: String,
        api_key: String,
        team_search: String,
        last: u32,
        team_id: TeamIdCache,
    },
}

impl ApiFootballProvider {
    pub fn from_fixture(name: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn from_config(cfg: &ProviderConfig, team_name: &str) -> Self {
        let fetcher = HttpFetcher::new(
            &cfg.name,
            Duration::from_millis(cfg.timeout_ms),
            RetryPolicy::new(cfg.max_retries, Duration::from_millis(cfg.backoff_ms)),
        );
        let team_id = Arc::new(match cfg.team_id {
            Some(id) => OnceCell::new_with(Some(id)),
            None => OnceCell::new(),
        });
        Self {
            name: cfg.name.clone(),
            mode: Mode::Http {
                fetcher,
                base_url: cfg
                    .base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: cfg.api_key.clone(),
                team_search: cfg
                    .query
                    .clone()
                    .unwrap_or_else(|| team_name.to_string()),
                last: cfg.last.max(1),
                team_id,
            },
        }
    }

    /// Resolve the team id through `cache` instead of a private cell, so the
    /// `/v3/teams` lookup happens once across runs. A configured id wins.
    pub fn with_team_id_cache(mut self, cache: TeamIdCache) -> Self {
        if let Mode::Http { team_id, .. } = &mut self.mode {
            if team_id.get().is_none() {
                *team_id = cache;
            }
        }
        self
    }
}

fn rapidapi_request(url: String, api_key: &str) -> FetchRequest {
    FetchRequest::get(url)
        .header("X-RapidAPI-Key", api_key)
        .header("X-RapidAPI-Host", RAPIDAPI_HOST)
}

#[async_trait]
impl SourceProvider for ApiFootballProvider {
    async fn fetch(&self) -> Result<Vec<RawProviderRecord>, ProviderError> {
        let records = match &self.mode {
            Mode::Fixture(body) => parse_fixtures(body)?,
            Mode::Http {
                fetcher,
                base_url,
                api_key,
                team_search,
                last,
                team_id,
            } => {
                let id = team_id
                    .get_or_try_init(|| async {
                        let req = rapidapi_request(format!("{base_url}/v3/teams"), api_key)
                            .query("search", team_search);
                        let body = fetcher.get_text(&req).await?;
                        let id = pick_team_id(&body, team_search)?;
                        tracing::info!(target: "ingest", provider = %self.name, team_id = id, "resolved team id");
                        Ok::<u64, ProviderError>(id)
                    })
                    .await?;
                let req = rapidapi_request(format!("{base_url}/v3/fixtures"), api_key)
                    .query("team", id)
                    .query("last", last);
                parse_fixtures(&fetcher.get_text(&req).await?)?
            }
        };
        counter!("ingest_fetched_total", "provider" => self.name.clone())
            .increment(records.len() as u64);
        Ok(records)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
