// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /api/cron/update-news  (401 / 200 / 409 / 500)
// - GET /debug/last-run

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use common::{articles, flamengo, ScriptedProvider};
use matchday_ingest::api::{self, AppState};
use matchday_ingest::ingest::error::{ConfigError, ProviderError};
use matchday_ingest::ingest::normalize::Normalizer;
use matchday_ingest::ingest::orchestrator::{Orchestrator, ProviderJob};
use matchday_ingest::ingest::pipeline::{ConfigPipeline, Pipeline, PipelineBuilder};
use matchday_ingest::ingest::store::MemoryStore;
use matchday_ingest::ingest::types::{RawProviderRecord, SourceProvider};

const BODY_LIMIT: usize = 1024 * 1024;
const SECRET: &str = "test-cron-secret";

/// Builds pipelines from scripted providers and counts provider fetches.
struct FakePipeline {
    store: Arc<MemoryStore>,
    fail_b: bool,
    fetches: Arc<AtomicUsize>,
}

impl FakePipeline {
    fn new(fail_b: bool) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            fail_b,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl PipelineBuilder for FakePipeline {
    fn build(&self) -> Result<Pipeline, ConfigError> {
        let a = ScriptedProvider::ok("a", articles(2));
        let b = if self.fail_b {
            ScriptedProvider::failing("b", ProviderError::Unavailable("down".into()))
        } else {
            ScriptedProvider::ok("b", articles(1))
        };
        let total = self.fetches.clone();
        let jobs = vec![
            ProviderJob::new(CountingProvider::wrap(a, total.clone())),
            ProviderJob::new(CountingProvider::wrap(b, total)),
        ];
        let orch = Orchestrator::new(self.store.clone(), Normalizer::new(flamengo()));
        Ok(Pipeline::new(orch, jobs, Duration::from_secs(5)))
    }
}

/// Adds every fetch to a counter shared by the whole test.
struct CountingProvider {
    inner: ScriptedProvider,
    total: Arc<AtomicUsize>,
}

impl CountingProvider {
    fn wrap(
        inner: ScriptedProvider,
        total: Arc<AtomicUsize>,
    ) -> Arc<dyn SourceProvider> {
        Arc::new(Self { inner, total })
    }
}

#[async_trait::async_trait]
impl SourceProvider for CountingProvider {
    async fn fetch(&self) -> Result<Vec<RawProviderRecord>, ProviderError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

fn app_with(builder: Arc<dyn PipelineBuilder>, secret: Option<&str>) -> (Router, AppState) {
    let state = AppState::new(secret.map(String::from), builder);
    (api::router(state.clone()), state)
}

fn trigger(auth: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri("/api/cron/update-news");
    if let Some(v) = auth {
        b = b.header("Authorization", v);
    }
    b.body(Body::empty()).expect("build trigger request")
}

async fn json_body(resp: shuttle_axum::axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (app, _) = app_with(Arc::new(FakePipeline::new(false)), Some(SECRET));
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap().trim(), "OK");
}

#[tokio::test]
async fn trigger_without_bearer_is_401_and_calls_no_provider() {
    let fake = Arc::new(FakePipeline::new(false));
    let fetches = fake.fetches.clone();
    let (app, _) = app_with(fake, Some(SECRET));

    let resp = app.clone().oneshot(trigger(None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(trigger(Some("Bearer not-the-secret")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn trigger_with_bearer_runs_and_reports() {
    let fake = Arc::new(FakePipeline::new(false));
    let fetches = fake.fetches.clone();
    let (app, _) = app_with(fake, Some(SECRET));

    let resp = app
        .oneshot(trigger(Some(&format!("Bearer {SECRET}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["degraded"], false);
    assert_eq!(v["report"]["timed_out"], false);
    assert_eq!(v["report"]["providers"]["a"]["state"], "done");
    assert_eq!(v["report"]["providers"]["a"]["created"], 2);
    assert_eq!(v["report"]["providers"]["b"]["created"], 1);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn partial_failure_is_still_200_but_degraded() {
    let (app, _) = app_with(Arc::new(FakePipeline::new(true)), Some(SECRET));
    let resp = app
        .oneshot(trigger(Some(&format!("Bearer {SECRET}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["degraded"], true);
    assert_eq!(v["report"]["providers"]["a"]["state"], "done");
    assert_eq!(
        v["report"]["providers"]["b"]["state"]["failed"],
        "provider-unavailable"
    );
    assert_eq!(
        v["report"]["providers"]["b"]["errors"][0]["record_ref"],
        "provider"
    );
}

#[tokio::test]
async fn missing_secret_or_config_is_500() {
    let (app, _) = app_with(Arc::new(FakePipeline::new(false)), None);
    let resp = app.oneshot(trigger(Some("Bearer anything"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v = json_body(resp).await;
    assert_eq!(v["error"], "Internal Server Error");

    let broken = Arc::new(ConfigPipeline::unavailable("config/ingest.toml not found"));
    let (app, _) = app_with(broken, Some(SECRET));
    let resp = app
        .oneshot(trigger(Some(&format!("Bearer {SECRET}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v = json_body(resp).await;
    assert!(v["message"]
        .as_str()
        .unwrap()
        .contains("config/ingest.toml not found"));
}

#[tokio::test]
async fn overlapping_trigger_is_409() {
    let (app, state) = app_with(Arc::new(FakePipeline::new(false)), Some(SECRET));
    let _running = state.run_guard.lock().await;

    let resp = app
        .oneshot(trigger(Some(&format!("Bearer {SECRET}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn last_run_is_null_until_a_run_happens() {
    let (app, _) = app_with(Arc::new(FakePipeline::new(false)), Some(SECRET));
    let last = || {
        Request::builder()
            .uri("/debug/last-run")
            .body(Body::empty())
            .unwrap()
    };

    let v = json_body(app.clone().oneshot(last()).await.unwrap()).await;
    assert!(v.is_null());

    let resp = app
        .clone()
        .oneshot(trigger(Some(&format!("Bearer {SECRET}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(app.oneshot(last()).await.unwrap()).await;
    assert_eq!(v["providers"]["a"]["created"], 2);
}
