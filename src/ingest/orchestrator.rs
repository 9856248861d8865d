// src/ingest/orchestrator.rs
//! Drives one ingestion run.
//!
//! Each provider runs as its own task:
//! `Pending → Fetching → Normalizing → Classifying → Writing → Done`, or
//! `Failed(reason)`. Tasks never touch the report; they send progress events
//! to the run loop, which owns it. The run budget is enforced through a
//! `CancellationToken` shared by every task.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::dedup::{Decision, Deduplicator};
use crate::ingest::error::StoreError;
use crate::ingest::normalize::Normalizer;
use crate::ingest::report::{Progress, ProviderEvent, ProviderState, RecordError, RunReport};
use crate::ingest::store::ContentStore;
use crate::ingest::types::{ContentItem, ContentKind, SourceProvider};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Providers processed concurrently.
    pub worker_limit: usize,
    /// Store writes in flight per provider.
    pub write_concurrency: usize,
    pub store_timeout: Duration,
    /// Time idle tasks get to wind down once the budget is spent. Store calls
    /// already in flight are additionally given up to `store_timeout`.
    pub grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            write_concurrency: 8,
            store_timeout: Duration::from_secs(5),
            grace: Duration::from_millis(250),
        }
    }
}

/// A provider plus its per-run item cap.
#[derive(Clone)]
pub struct ProviderJob {
    pub provider: Arc<dyn SourceProvider>,
    pub max_items: Option<usize>,
}

impl ProviderJob {
    pub fn new(provider: Arc<dyn SourceProvider>) -> Self {
        Self {
            provider,
            max_items: None,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

impl From<Arc<dyn SourceProvider>> for ProviderJob {
    fn from(provider: Arc<dyn SourceProvider>) -> Self {
        Self::new(provider)
    }
}

/// Serializes store writes per natural key. Cloning shares the table, so one
/// instance can guard several orchestrators writing to the same store.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

pub struct KeyGuard {
    key: String,
    locks: KeyLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let slot = {
            let mut map = self.inner.lock().expect("key lock table poisoned");
            map.entry(key.to_string()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    /// Keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut map) = self.locks.inner.lock() {
            // Only the table still references the mutex: nobody holds or awaits it.
            if map.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
                map.remove(&self.key);
            }
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn ContentStore>,
    normalizer: Arc<Normalizer>,
    settings: OrchestratorSettings,
    locks: KeyLocks,
}

#[derive(Clone)]
struct TaskCtx {
    store: Arc<dyn ContentStore>,
    normalizer: Arc<Normalizer>,
    settings: OrchestratorSettings,
    locks: KeyLocks,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<ProviderEvent>,
}

enum WriteOutcome {
    Written(Decision),
    Failed(RecordError),
    Cancelled,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ContentStore>, normalizer: Normalizer) -> Self {
        Self {
            store,
            normalizer: Arc::new(normalizer),
            settings: OrchestratorSettings::default(),
            locks: KeyLocks::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_locks(mut self, locks: KeyLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Run every provider once within `budget`. Never fails: every problem
    /// ends up in the returned report.
    pub async fn run(&self, jobs: Vec<ProviderJob>, budget: Duration) -> RunReport {
        crate::ingest::ensure_metrics_described();
        let t0 = Instant::now();
        let mut report = RunReport::new(Utc::now());
        for job in &jobs {
            report
                .providers
                .entry(job.provider.name().to_string())
                .or_default();
        }

        let cancel = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(self.settings.worker_limit.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        for job in jobs {
            let ctx = TaskCtx {
                store: self.store.clone(),
                normalizer: self.normalizer.clone(),
                settings: self.settings.clone(),
                locks: self.locks.clone(),
                cancel: cancel.clone(),
                permits: permits.clone(),
                tx: tx.clone(),
            };
            tasks.spawn(run_provider(ctx, job));
        }
        drop(tx);

        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                ev = rx.recv() => match ev {
                    Some(ev) => report.apply(ev),
                    None => break,
                },
                _ = &mut deadline => {
                    report.timed_out = true;
                    cancel.cancel();
                    break;
                }
            }
        }

        if report.timed_out {
            warn!(
                target: "ingest",
                budget_ms = budget.as_millis() as u64,
                "run budget exceeded; cancelling in-flight providers"
            );
            let grace = tokio::time::sleep(self.settings.grace + self.settings.store_timeout);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    ev = rx.recv() => match ev {
                        Some(ev) => report.apply(ev),
                        None => break,
                    },
                    _ = &mut grace => break,
                }
            }
            tasks.abort_all();
        }
        while tasks.join_next().await.is_some() {}
        while let Ok(ev) = rx.try_recv() {
            report.apply(ev);
        }

        let abandoned_reason = if report.timed_out {
            "budget-exceeded"
        } else {
            "task-aborted"
        };
        for (name, p) in report.providers.iter_mut() {
            if p.state.is_terminal() {
                continue;
            }
            warn!(target: "ingest", provider = %name, state = ?p.state, "provider abandoned");
            p.errors.push(RecordError::new("provider", abandoned_reason));
            if !report.timed_out {
                p.state = ProviderState::Failed(abandoned_reason.to_string());
            }
        }

        report.finished_at = Utc::now();
        report.duration_ms = t0.elapsed().as_millis() as u64;

        counter!("ingest_runs_total").increment(1);
        histogram!("ingest_run_ms").record(report.duration_ms as f64);
        gauge!("ingest_last_run_ts").set(report.finished_at.timestamp() as f64);
        info!(
            target: "ingest",
            providers = report.providers.len(),
            created = report.total_created(),
            updated = report.total_updated(),
            errors = report.total_errors(),
            timed_out = report.timed_out,
            duration_ms = report.duration_ms,
            "ingest run finished"
        );
        report
    }
}

async fn run_provider(ctx: TaskCtx, job: ProviderJob) {
    let name = job.provider.name().to_string();
    let emit = |progress: Progress| {
        // The receiver only disappears once the run loop is done with us.
        let _ = ctx.tx.send(ProviderEvent {
            provider: name.clone(),
            progress,
        });
    };

    let _permit = tokio::select! {
        p = ctx.permits.clone().acquire_owned() => match p {
            Ok(p) => p,
            Err(_) => return,
        },
        _ = ctx.cancel.cancelled() => return,
    };

    // Fetching
    emit(Progress::State(ProviderState::Fetching));
    let fetched = tokio::select! {
        r = job.provider.fetch() => r,
        _ = ctx.cancel.cancelled() => return,
    };
    let mut records = match fetched {
        Ok(records) => records,
        Err(e) => {
            warn!(target: "ingest", provider = %name, error = %e, "provider fetch failed");
            counter!("ingest_provider_errors_total", "provider" => name.clone(), "kind" => e.code())
                .increment(1);
            emit(Progress::Error(RecordError::new("provider", e.report_reason())));
            emit(Progress::State(ProviderState::Failed(e.code().to_string())));
            return;
        }
    };
    emit(Progress::Fetched(records.len()));
    if let Some(cap) = job.max_items {
        if records.len() > cap {
            // Keep the newest; records without a usable timestamp go last.
            records.sort_by_key(|r| Reverse(r.timestamp()));
            emit(Progress::Filtered(records.len() - cap));
            records.truncate(cap);
        }
    }
    if ctx.cancel.is_cancelled() {
        return;
    }

    // Normalizing
    emit(Progress::State(ProviderState::Normalizing));
    let batch = ctx.normalizer.normalize_batch(&records, &name, Utc::now());
    emit(Progress::Normalized(batch.items.len()));
    let mut filtered = 0usize;
    for r in batch.rejected {
        if r.reason.is_filter() {
            filtered += 1;
            continue;
        }
        debug!(target: "ingest", provider = %name, record = %r.record_ref, reason = %r.reason, "record rejected");
        counter!("ingest_rejected_total", "provider" => name.clone()).increment(1);
        emit(Progress::Error(RecordError::new(r.record_ref, r.reason.as_str())));
    }
    if filtered > 0 {
        emit(Progress::Filtered(filtered));
    }
    if ctx.cancel.is_cancelled() {
        return;
    }

    // Classifying
    emit(Progress::State(ProviderState::Classifying));
    let mut kinds: Vec<ContentKind> = batch.items.iter().map(|it| it.kind).collect();
    kinds.sort_by_key(|k| k.as_str());
    kinds.dedup();
    let mut existing = HashMap::new();
    for kind in kinds {
        let listed = tokio::select! {
            r = tokio::time::timeout(ctx.settings.store_timeout, ctx.store.list_existing_keys(kind)) => r,
            _ = ctx.cancel.cancelled() => return,
        };
        match listed {
            Ok(Ok(keys)) => existing.extend(keys),
            Ok(Err(e)) => return fail_listing(&emit, &name, e),
            Err(_) => {
                let e = StoreError::Timeout(ctx.settings.store_timeout.as_millis() as u64);
                return fail_listing(&emit, &name, e);
            }
        }
    }
    let mut titles = HashMap::new();
    if batch.items.iter().any(|it| it.kind == ContentKind::Article) {
        let listed = tokio::select! {
            r = tokio::time::timeout(ctx.settings.store_timeout, ctx.store.list_article_titles(&name)) => r,
            _ = ctx.cancel.cancelled() => return,
        };
        match listed {
            Ok(Ok(t)) => titles = t,
            Ok(Err(e)) => return fail_listing(&emit, &name, e),
            Err(_) => {
                let e = StoreError::Timeout(ctx.settings.store_timeout.as_millis() as u64);
                return fail_listing(&emit, &name, e);
            }
        }
    }
    let mut writes = Vec::new();
    let mut skipped = 0usize;
    let mut dedup = Deduplicator::new(existing).with_titles(titles);
    for (item, decision) in dedup.decide_all(batch.items) {
        match decision {
            Decision::Skip => skipped += 1,
            _ => writes.push((item, decision)),
        }
    }
    if skipped > 0 {
        counter!("ingest_skipped_total", "provider" => name.clone()).increment(skipped as u64);
        emit(Progress::Skipped(skipped));
    }
    if writes.is_empty() {
        emit(Progress::State(ProviderState::Done));
        return;
    }
    if ctx.cancel.is_cancelled() {
        return;
    }

    // Writing
    emit(Progress::State(ProviderState::Writing));
    let concurrency = ctx.settings.write_concurrency.max(1);
    let mut outcomes = stream::iter(writes)
        .map(|(item, decision)| write_one(&ctx, &name, item, decision))
        .buffer_unordered(concurrency);
    let (mut written, mut failed, mut dropped) = (0usize, 0usize, 0usize);
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            WriteOutcome::Written(decision) => {
                written += 1;
                if decision == Decision::Create {
                    counter!("ingest_created_total", "provider" => name.clone()).increment(1);
                    emit(Progress::Created);
                } else {
                    counter!("ingest_updated_total", "provider" => name.clone()).increment(1);
                    emit(Progress::Updated);
                }
            }
            WriteOutcome::Failed(err) => {
                failed += 1;
                emit(Progress::Error(err));
            }
            WriteOutcome::Cancelled => dropped += 1,
        }
    }
    if dropped > 0 {
        return;
    }

    if written == 0 && failed > 0 {
        emit(Progress::State(ProviderState::Failed(
            "store-write-failed".to_string(),
        )));
    } else {
        emit(Progress::State(ProviderState::Done));
    }
}

fn fail_listing(emit: &impl Fn(Progress), provider: &str, e: StoreError) {
    warn!(target: "ingest", provider = %provider, error = %e, "store listing failed");
    emit(Progress::Error(RecordError::new("store", format!("{}: {e}", e.code()))));
    emit(Progress::State(ProviderState::Failed(e.code().to_string())));
}

/// Reports a write whose future was dropped mid store call (task aborted):
/// the store may or may not have applied it.
struct InFlightWrite<'a> {
    tx: &'a mpsc::UnboundedSender<ProviderEvent>,
    provider: &'a str,
    natural_key: &'a str,
    settled: bool,
}

impl Drop for InFlightWrite<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(target: "ingest", natural_key = %self.natural_key, "write cut off; outcome unknown");
        let _ = self.tx.send(ProviderEvent {
            provider: self.provider.to_string(),
            progress: Progress::Error(RecordError::new(self.natural_key, "write-outcome-unknown")),
        });
    }
}

/// Create/Update one item under its key lock. Checks for cancellation before
/// starting, never in the middle of a store call.
async fn write_one(
    ctx: &TaskCtx,
    provider: &str,
    item: ContentItem,
    decision: Decision,
) -> WriteOutcome {
    if ctx.cancel.is_cancelled() {
        return WriteOutcome::Cancelled;
    }
    let _guard = ctx.locks.lock(&item.natural_key).await;
    // The budget may have fired while we waited for the key.
    if ctx.cancel.is_cancelled() {
        return WriteOutcome::Cancelled;
    }
    let mut in_flight = InFlightWrite {
        tx: &ctx.tx,
        provider,
        natural_key: &item.natural_key,
        settled: false,
    };
    let call = async {
        match decision {
            Decision::Create => ctx.store.create(&item).await,
            Decision::Update => ctx.store.update(&item.natural_key, &item).await,
            Decision::Skip => Ok(()),
        }
    };
    let result = match tokio::time::timeout(ctx.settings.store_timeout, call).await {
        Ok(r) => r,
        Err(_) => Err(StoreError::Timeout(
            ctx.settings.store_timeout.as_millis() as u64
        )),
    };
    in_flight.settled = true;
    drop(in_flight);
    match result {
        Ok(()) => {
            debug!(target: "ingest", natural_key = %item.natural_key, ?decision, "item written");
            WriteOutcome::Written(decision)
        }
        Err(e) => {
            warn!(target: "ingest", natural_key = %item.natural_key, error = %e, "store write failed");
            let reason = format!("{}: {e}", e.code());
            WriteOutcome::Failed(RecordError::new(item.natural_key, reason))
        }
    }
}
