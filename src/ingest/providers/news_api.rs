// src/ingest/providers/news_api.rs
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::ingest::client::{parse_json, FetchRequest, HttpFetcher, RetryPolicy};
use crate::ingest::error::ProviderError;
use crate::ingest::types::{RawPayload, RawProviderRecord, SourceProvider};

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    #[serde(default)]
    name: Option<String>,
}

/// One article as newsapi.org delivers it.
#[derive(Debug, Deserialize)]
pub struct NewsApiArticle {
    #[serde(default)]
    source: Option<ArticleSource>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "urlToImage")]
    url_to_image: Option<String>,
    #[serde(default, rename = "publishedAt")]
    published_at: Option<String>,
}

impl NewsApiArticle {
    fn into_record(self, index: usize) -> RawProviderRecord {
        // Prefer the summary; `content` is truncated by the API and carries a "[+N chars]" tail.
        let body = self
            .description
            .filter(|d| !d.trim().is_empty())
            .or(self.content);
        RawProviderRecord {
            record_ref: format!("#{}", index + 1),
            native_id: self.url.clone(),
            payload: RawPayload::Article {
                title: self.title,
                body,
                published_at: self.published_at,
                url: self.url,
                image_url: self.url_to_image,
                image_alt: None,
                source_name: self.source.and_then(|s| s.name),
            },
        }
    }
}

fn is_auth_code(code: &str) -> bool {
    matches!(
        code,
        "apiKeyInvalid" | "apiKeyMissing" | "apiKeyDisabled" | "apiKeyExhausted"
    )
}

fn parse_body(body: &str) -> Result<Vec<RawProviderRecord>, ProviderError> {
    let t0 = std::time::Instant::now();
    let env: Envelope = parse_json(body)?;
    if env.status != "ok" {
        let code = env.code.unwrap_or_default();
        let msg = format!("{code}: {}", env.message.unwrap_or_default());
        return Err(if is_auth_code(&code) {
            ProviderError::Auth(msg)
        } else {
            ProviderError::MalformedResponse(msg)
        });
    }
    let out: Vec<_> = env
        .articles
        .into_iter()
        .enumerate()
        .map(|(i, a)| a.into_record(i))
        .collect();

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

pub struct NewsApiProvider {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        fetcher: HttpFetcher,
        request: FetchRequest,
    },
}

impl NewsApiProvider {
    /// Serve a canned response body instead of calling the API.
    pub fn from_fixture(name: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn from_config(cfg: &ProviderConfig) -> Self {
        let base = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let request = FetchRequest::get(format!("{}/v2/everything", base.trim_end_matches('/')))
            .query("q", cfg.query.as_deref().unwrap_or_default())
            .query("language", cfg.language.as_deref().unwrap_or("pt"))
            .query("sortBy", cfg.sort_by.as_deref().unwrap_or("publishedAt"))
            .header("X-Api-Key", &cfg.api_key);
        let fetcher = HttpFetcher::new(
            &cfg.name,
            Duration::from_millis(cfg.timeout_ms),
            RetryPolicy::new(cfg.max_retries, Duration::from_millis(cfg.backoff_ms)),
        );
        Self {
            name: cfg.name.clone(),
            mode: Mode::Http { fetcher, request },
        }
    }
}

#[async_trait]
impl SourceProvider for NewsApiProvider {
    async fn fetch(&self) -> Result<Vec<RawProviderRecord>, ProviderError> {
        let records = match &self.mode {
            Mode::Fixture(body) => parse_body(body)?,
            Mode::Http { fetcher, request } => parse_body(&fetcher.get_text(request).await?)?,
        };
        counter!("ingest_fetched_total", "provider" => self.name.clone())
            .increment(records.len() as u64);
        Ok(records)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
