// src/ingest/client.rs
//! HTTP side of the provider client: per-call timeout, bounded retries with
//! exponential backoff on transport failures, status/body classification.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::ingest::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    /// 2 retries: 200ms, then 800ms.
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            factor: 4,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(retry))
    }
}

/// One GET request, rebuilt on every attempt.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl ToString) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
    provider: String,
}

impl HttpFetcher {
    pub fn new(provider: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            timeout,
            retry,
            provider: provider.to_string(),
        }
    }

    async fn attempt(&self, req: &FetchRequest) -> Result<(StatusCode, String), reqwest::Error> {
        let mut builder = self
            .client
            .get(&req.url)
            .query(&req.query)
            .timeout(self.timeout);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        Ok((status, body))
    }

    /// Raw body of a 2xx response.
    ///
    /// Only transport errors and timeouts are retried; a response that arrived
    /// but is wrong (non-2xx) is classified immediately.
    pub async fn get_text(&self, req: &FetchRequest) -> Result<String, ProviderError> {
        let mut retry: u32 = 0;
        loop {
            match self.attempt(req).await {
                Ok((status, body)) => {
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(ProviderError::Auth(format!("HTTP {status}")));
                    }
                    if !status.is_success() {
                        return Err(ProviderError::MalformedResponse(format!("HTTP {status}")));
                    }
                    return Ok(body);
                }
                Err(e) => {
                    if retry < self.retry.max_retries {
                        let delay = self.retry.delay_for(retry);
                        tracing::warn!(
                            target: "ingest",
                            provider = %self.provider,
                            error = %e,
                            retry = retry + 1,
                            delay_ms = delay.as_millis() as u64,
                            "provider request failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        retry += 1;
                        continue;
                    }
                    return Err(ProviderError::Unavailable(format!(
                        "{e} (after {} attempts)",
                        retry + 1
                    )));
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, req: &FetchRequest) -> Result<T, ProviderError> {
        let body = self.get_text(req).await?;
        parse_json(&body)
    }
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(format!("body: {e}")))
}
