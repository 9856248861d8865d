// src/config/ingest.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::ingest::normalize::provider_slug;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

pub const ENV_CRON_SECRET: &str = "CRON_SECRET";
pub const ENV_STORE_URL: &str = "CONTENT_STORE_URL";
pub const ENV_STORE_KEY: &str = "CONTENT_STORE_KEY";

/// Hard ceiling imposed by the trigger environment; the run budget must stay below it.
pub const TRIGGER_CEILING_SECS: u64 = 60;

fn default_budget_secs() -> u64 {
    50
}
fn default_worker_limit() -> usize {
    4
}
fn default_write_concurrency() -> usize {
    8
}
fn default_store_timeout_ms() -> u64 {
    5_000
}
fn default_grace_ms() -> u64 {
    250
}
fn default_history_capacity() -> usize {
    50
}
fn default_timeout_ms() -> u64 {
    8_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    200
}
fn default_max_items() -> usize {
    20
}
fn default_last() -> u32 {
    5
}
fn default_enabled() -> bool {
    true
}
fn default_table() -> String {
    "content_items".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Wall-clock budget for one run, in seconds (< 60).
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,
    /// Providers processed at the same time.
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    /// Concurrent store writes within one provider.
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// How long cancelled providers may take to finish their current item.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    pub tracked_team: TrackedTeamConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    /// Shared secret for the trigger endpoint; only ever read from the environment.
    #[serde(skip)]
    pub cron_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTeamConfig {
    /// Canonical team name, e.g. "Flamengo".
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Provider name → provider-native team id.
    #[serde(default)]
    pub ids: HashMap<String, String>,
    /// Articles must mention one of these (case-insensitive). Empty disables the filter.
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    NewsApi,
    ApiFootball,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the provider's public endpoint (tests, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    /// "ENV" means: read from NEWS_API_KEY / RAPIDAPI_KEY (by kind)
    #[serde(default)]
    pub api_key: String,
    /// news-api: search query; api-football: team search name.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    /// api-football: numeric team id; resolved through the search endpoint when absent.
    #[serde(default)]
    pub team_id: Option<u64>,
    /// api-football: number of most recent fixtures to request.
    #[serde(default = "default_last")]
    pub last: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Records beyond this count are dropped as filtered.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// REST endpoint of the content store; in-memory store when absent.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            table: default_table(),
        }
    }
}

impl ProviderKind {
    fn key_env(&self) -> &'static str {
        match self {
            ProviderKind::NewsApi => "NEWS_API_KEY",
            ProviderKind::ApiFootball => "RAPIDAPI_KEY",
        }
    }
}

impl IngestConfig {
    /// Parse, resolve env secrets, and validate.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: IngestConfig = toml::from_str(s).context("parsing ingest config")?;
        cfg.resolve_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallback:
    /// 1) $INGEST_CONFIG_PATH
    /// 2) config/ingest.toml
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from(&pb);
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::load_from(&fallback);
        }
        Err(anyhow!(
            "no ingest config found (set {ENV_CONFIG_PATH} or create {DEFAULT_CONFIG_PATH})"
        ))
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    fn resolve_env(&mut self) -> Result<()> {
        for p in self.providers.iter_mut().filter(|p| p.enabled) {
            if p.api_key.trim().eq_ignore_ascii_case("env") {
                let var = p.kind.key_env();
                p.api_key = env::var(var)
                    .map_err(|_| anyhow!("Missing {var} env var for provider '{}'", p.name))?;
            }
        }

        if let Some(url) = non_empty_env(ENV_STORE_URL) {
            self.store.url = Some(url);
        }
        if let Some(key) = non_empty_env(ENV_STORE_KEY) {
            self.store.api_key = Some(key);
        }
        self.cron_secret = non_empty_env(ENV_CRON_SECRET);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.budget_secs == 0 || self.budget_secs >= TRIGGER_CEILING_SECS {
            bail!(
                "budget_secs must be between 1 and {} (got {})",
                TRIGGER_CEILING_SECS - 1,
                self.budget_secs
            );
        }
        if self.worker_limit == 0 {
            bail!("worker_limit must be at least 1");
        }
        if self.write_concurrency == 0 {
            bail!("write_concurrency must be at least 1");
        }
        if self.tracked_team.name.trim().is_empty() {
            bail!("tracked_team.name must not be empty");
        }

        let mut seen = BTreeSet::new();
        for p in &self.providers {
            let name = p.name.trim();
            if name.is_empty() {
                bail!("provider name must not be empty");
            }
            if !seen.insert(provider_slug(name)) {
                bail!("duplicate provider name '{name}' (key prefix '{}')", provider_slug(name));
            }
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[tracked_team]
name = "Flamengo"

[[providers]]
name = "news-api"
kind = "news-api"
api_key = "literal-key"
query = "Flamengo"
"#;

    #[test]
    fn defaults_apply_to_minimal_config() {
        let cfg = IngestConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.budget_secs, 50);
        assert_eq!(cfg.worker_limit, 4);
        assert_eq!(cfg.store.table, "content_items");
        let p = &cfg.providers[0];
        assert_eq!(p.kind, ProviderKind::NewsApi);
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.backoff_ms, 200);
        assert_eq!(p.api_key, "literal-key");
        assert!(p.enabled);
    }

    #[test]
    fn budget_at_or_above_ceiling_is_rejected() {
        let s = format!("budget_secs = 60\n{MINIMAL}");
        let err = IngestConfig::from_toml_str(&s).unwrap_err();
        assert!(err.to_string().contains("budget_secs"));
    }

    #[test]
    fn duplicate_provider_names_are_rejected() {
        let s = format!(
            "{MINIMAL}\n[[providers]]\nname = \"NEWS-API\"\nkind = \"news-api\"\napi_key = \"k\"\n"
        );
        let err = IngestConfig::from_toml_str(&s).unwrap_err();
        assert!(err.to_string().contains("duplicate provider"));
    }

    #[test]
    fn provider_names_sharing_a_key_prefix_are_rejected() {
        // "news api" and "news-api" both key their items as "news-api:…".
        let s = format!(
            "{MINIMAL}\n[[providers]]\nname = \"News  API\"\nkind = \"news-api\"\napi_key = \"k\"\n"
        );
        let err = IngestConfig::from_toml_str(&s).unwrap_err();
        assert!(err.to_string().contains("key prefix 'news-api'"), "{err}");
    }
}
