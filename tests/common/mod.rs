// tests/common/mod.rs
//
// Shared doubles for the integration tests: scripted providers and a store
// wrapper that slows writes down.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use matchday_ingest::ingest::error::{ProviderError, StoreError};
use matchday_ingest::ingest::normalize::TrackedTeam;
use matchday_ingest::ingest::store::{ContentStore, MemoryStore};
use matchday_ingest::ingest::types::{
    ContentItem, ContentKind, RawPayload, RawProviderRecord, SourceProvider,
};

pub fn flamengo() -> TrackedTeam {
    TrackedTeam::new("Flamengo").with_keyword("flamengo")
}

pub fn article(n: usize) -> RawProviderRecord {
    RawProviderRecord {
        record_ref: format!("#{n}"),
        native_id: Some(format!("https://news.example/flamengo/{n}")),
        payload: RawPayload::Article {
            title: Some(format!("Flamengo notícia {n}")),
            body: Some(format!("Texto da notícia {n} sobre o Flamengo.")),
            published_at: Some(format!("2025-05-{:02}T12:00:00Z", n.clamp(1, 28))),
            url: Some(format!("https://news.example/flamengo/{n}")),
            image_url: None,
            image_alt: None,
            source_name: Some("Gazeta Rubro-Negra".to_string()),
        },
    }
}

pub fn articles(n: usize) -> Vec<RawProviderRecord> {
    (1..=n).map(article).collect()
}

/// Provider that returns a canned result after an optional delay and counts calls.
pub struct ScriptedProvider {
    name: String,
    result: Result<Vec<RawProviderRecord>, ProviderError>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn ok(name: &str, records: Vec<RawProviderRecord>) -> Self {
        Self {
            name: name.to_string(),
            result: Ok(records),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str, err: ProviderError) -> Self {
        Self {
            name: name.to_string(),
            result: Err(err),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn shared(self) -> Arc<dyn SourceProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceProvider for ScriptedProvider {
    async fn fetch(&self) -> Result<Vec<RawProviderRecord>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Delegates to a `MemoryStore`, sleeping before every create/update.
pub struct SlowStore {
    pub inner: Arc<MemoryStore>,
    pub write_delay: Duration,
}

#[async_trait]
impl ContentStore for SlowStore {
    async fn list_existing_keys(
        &self,
        kind: ContentKind,
    ) -> Result<HashMap<String, String>, StoreError> {
        self.inner.list_existing_keys(kind).await
    }

    async fn list_article_titles(
        &self,
        provider: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        self.inner.list_article_titles(provider).await
    }

    async fn create(&self, item: &ContentItem) -> Result<(), StoreError> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.create(item).await
    }

    async fn update(&self, natural_key: &str, item: &ContentItem) -> Result<(), StoreError> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.update(natural_key, item).await
    }
}

/// Lists nothing and panics inside every write, after the call has started.
pub struct PanickingStore;

#[async_trait]
impl ContentStore for PanickingStore {
    async fn list_existing_keys(
        &self,
        _kind: ContentKind,
    ) -> Result<HashMap<String, String>, StoreError> {
        Ok(HashMap::new())
    }

    async fn create(&self, _item: &ContentItem) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        panic!("store connection dropped mid write");
    }

    async fn update(&self, _natural_key: &str, _item: &ContentItem) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        panic!("store connection dropped mid write");
    }
}
