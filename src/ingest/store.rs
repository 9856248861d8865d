// src/ingest/store.rs
//! Content store gateway: the narrow interface to the CMS-side system of record.
//!
//! Each call is assumed atomic on its own; nothing here spans calls.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::ingest::error::StoreError;
use crate::ingest::types::{ContentItem, ContentKind};

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// `natural_key → content_hash` for every stored item of `kind`.
    async fn list_existing_keys(
        &self,
        kind: ContentKind,
    ) -> Result<HashMap<String, String>, StoreError>;
    async fn create(&self, item: &ContentItem) -> Result<(), StoreError>;
    async fn update(&self, natural_key: &str, item: &ContentItem) -> Result<(), StoreError>;

    /// `natural_key → title` for recent articles written by `provider`. Stores
    /// that cannot answer return nothing; titles are then only compared
    /// within a batch.
    async fn list_article_titles(
        &self,
        _provider: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        Ok(HashMap::new())
    }
}

/// In-process store for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, ContentItem>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, natural_key: &str) -> Option<ContentItem> {
        self.items
            .lock()
            .expect("memory store mutex poisoned")
            .get(natural_key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("memory store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful `create` + `update` calls.
    pub fn write_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn list_existing_keys(
        &self,
        kind: ContentKind,
    ) -> Result<HashMap<String, String>, StoreError> {
        let items = self.items.lock().expect("memory store mutex poisoned");
        Ok(items
            .values()
            .filter(|it| it.kind == kind)
            .map(|it| (it.natural_key.clone(), it.content_hash.clone()))
            .collect())
    }

    async fn list_article_titles(
        &self,
        provider: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        let items = self.items.lock().expect("memory store mutex poisoned");
        Ok(items
            .values()
            .filter(|it| it.kind == ContentKind::Article && it.source_provider == provider)
            .map(|it| (it.natural_key.clone(), it.title.clone()))
            .collect())
    }

    // Creating an existing key replaces it: the store resolves conflicts, not the caller.
    async fn create(&self, item: &ContentItem) -> Result<(), StoreError> {
        self.items
            .lock()
            .expect("memory store mutex poisoned")
            .insert(item.natural_key.clone(), item.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, natural_key: &str, item: &ContentItem) -> Result<(), StoreError> {
        let mut items = self.items.lock().expect("memory store mutex poisoned");
        match items.get_mut(natural_key) {
            Some(slot) => {
                *slot = item.clone();
                self.updates.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::WriteFailed {
                key: natural_key.to_string(),
                message: "not found".to_string(),
            }),
        }
    }
}

/// PostgREST-style REST gateway (`/<table>` with `eq.` filters).
pub struct RestContentStore {
    base_url: String,
    table: String,
    api_key: Option<String>,
    client: Client,
    timeout: Duration,
}

/// How many recent articles the title check looks back over.
const RECENT_TITLES_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct KeyRow {
    natural_key: String,
    content_hash: String,
}

#[derive(Debug, Deserialize)]
struct TitleRow {
    natural_key: String,
    title: String,
}

impl RestContentStore {
    pub fn new(base_url: &str, table: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            api_key,
            client: Client::new(),
            timeout,
        }
    }

    /// `None` when the config carries no store URL.
    pub fn from_config(cfg: &StoreConfig, timeout: Duration) -> Option<Self> {
        cfg.url
            .as_deref()
            .map(|url| Self::new(url, &cfg.table, cfg.api_key.clone(), timeout))
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, self.table)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.timeout.as_millis() as u64)
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }

    async fn write(
        &self,
        req: reqwest::RequestBuilder,
        natural_key: &str,
    ) -> Result<(), StoreError> {
        let resp = self
            .authorize(req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::WriteFailed {
            key: natural_key.to_string(),
            message: format!("{status}: {}", truncate(&body, 200)),
        })
    }
}

#[async_trait]
impl ContentStore for RestContentStore {
    async fn list_existing_keys(
        &self,
        kind: ContentKind,
    ) -> Result<HashMap<String, String>, StoreError> {
        let req = self.client.get(self.endpoint()).query(&[
            ("select", "natural_key,content_hash".to_string()),
            ("kind", format!("eq.{}", kind.as_str())),
        ]);
        let resp = self
            .authorize(req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(StoreError::Unavailable(format!("list keys: {status}")));
        }
        let rows: Vec<KeyRow> = resp
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("list keys body: {e}")))?;
        Ok(rows
            .into_iter()
            .map(|r| (r.natural_key, r.content_hash))
            .collect())
    }

    async fn list_article_titles(
        &self,
        provider: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        let req = self.client.get(self.endpoint()).query(&[
            ("select", "natural_key,title".to_string()),
            ("kind", format!("eq.{}", ContentKind::Article.as_str())),
            ("source_provider", format!("eq.{provider}")),
            ("order", "published_at.desc".to_string()),
            ("limit", RECENT_TITLES_LIMIT.to_string()),
        ]);
        let resp = self
            .authorize(req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(StoreError::Unavailable(format!("list titles: {status}")));
        }
        let rows: Vec<TitleRow> = resp
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("list titles body: {e}")))?;
        Ok(rows.into_iter().map(|r| (r.natural_key, r.title)).collect())
    }

    async fn create(&self, item: &ContentItem) -> Result<(), StoreError> {
        let req = self
            .client
            .post(self.endpoint())
            .header("Prefer", "resolution=merge-duplicates")
            .json(item);
        self.write(req, &item.natural_key).await
    }

    async fn update(&self, natural_key: &str, item: &ContentItem) -> Result<(), StoreError> {
        let req = self
            .client
            .patch(self.endpoint())
            .query(&[("natural_key", format!("eq.{natural_key}"))])
            .json(item);
        self.write(req, natural_key).await
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
