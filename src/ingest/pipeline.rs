// src/ingest/pipeline.rs
//! Per-run assembly of providers, store gateway and orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::IngestConfig;
use crate::ingest::error::ConfigError;
use crate::ingest::normalize::{Normalizer, TrackedTeam};
use crate::ingest::orchestrator::{KeyLocks, Orchestrator, OrchestratorSettings, ProviderJob};
use crate::ingest::providers::{self, TeamIdCache};
use crate::ingest::report::RunReport;
use crate::ingest::store::{ContentStore, MemoryStore, RestContentStore};

/// Serializes runs across the trigger endpoint and the scheduler.
pub type RunGuard = Arc<tokio::sync::Mutex<()>>;

/// Everything one run needs, built fresh for that run.
pub struct Pipeline {
    orchestrator: Orchestrator,
    jobs: Vec<ProviderJob>,
    budget: Duration,
}

impl Pipeline {
    pub fn new(orchestrator: Orchestrator, jobs: Vec<ProviderJob>, budget: Duration) -> Self {
        Self {
            orchestrator,
            jobs,
            budget,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.jobs
            .iter()
            .map(|j| j.provider.name().to_string())
            .collect()
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub async fn run(self) -> RunReport {
        self.orchestrator.run(self.jobs, self.budget).await
    }
}

pub trait PipelineBuilder: Send + Sync {
    fn build(&self) -> Result<Pipeline, ConfigError>;
}

/// Builds pipelines from an [`IngestConfig`]. Without a store URL every run
/// shares one in-process [`MemoryStore`].
pub struct ConfigPipeline {
    config: Result<IngestConfig, String>,
    memory: Arc<MemoryStore>,
    locks: KeyLocks,
    /// Provider name → team id resolved by a previous run.
    team_ids: Mutex<HashMap<String, TeamIdCache>>,
}

impl ConfigPipeline {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config: Ok(config),
            memory: Arc::new(MemoryStore::new()),
            locks: KeyLocks::default(),
            team_ids: Mutex::default(),
        }
    }

    /// A builder that refuses every run, e.g. because the config file is missing.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            config: Err(reason.into()),
            memory: Arc::new(MemoryStore::new()),
            locks: KeyLocks::default(),
            team_ids: Mutex::default(),
        }
    }

    /// `$INGEST_CONFIG_PATH`, then `config/ingest.toml`. Load errors are kept
    /// and surface on every build.
    pub fn load_default() -> Self {
        match IngestConfig::load_default() {
            Ok(cfg) => Self::new(cfg),
            Err(e) => {
                tracing::warn!(target: "ingest", error = %format!("{e:#}"), "ingest config not loaded");
                Self::unavailable(format!("{e:#}"))
            }
        }
    }

    pub fn config(&self) -> Option<&IngestConfig> {
        self.config.as_ref().ok()
    }

    pub fn memory_store(&self) -> Arc<MemoryStore> {
        self.memory.clone()
    }

    fn team_id_cache(&self, provider: &str) -> TeamIdCache {
        let mut map = self.team_ids.lock().expect("team id cache poisoned");
        map.entry(provider.to_string()).or_default().clone()
    }
}

impl PipelineBuilder for ConfigPipeline {
    fn build(&self) -> Result<Pipeline, ConfigError> {
        let cfg = self
            .config
            .as_ref()
            .map_err(|e| ConfigError::Unavailable(e.clone()))?;

        let store_timeout = Duration::from_millis(cfg.store_timeout_ms);
        let store: Arc<dyn ContentStore> =
            match RestContentStore::from_config(&cfg.store, store_timeout) {
                Some(rest) => Arc::new(rest),
                None => self.memory.clone(),
            };

        let mut team = TrackedTeam::from_config(&cfg.tracked_team);
        let mut jobs = Vec::new();
        for p in cfg.enabled_providers() {
            let team_id = self.team_id_cache(&p.name);
            if let Some(id) = p.team_id.or_else(|| team_id.get().copied()) {
                team = team.with_provider_id(&p.name, &id.to_string());
            }
            let provider = providers::from_config(p, &cfg.tracked_team.name, team_id);
            jobs.push(ProviderJob::new(provider).with_max_items(p.max_items));
        }
        if jobs.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let settings = OrchestratorSettings {
            worker_limit: cfg.worker_limit,
            write_concurrency: cfg.write_concurrency,
            store_timeout,
            grace: Duration::from_millis(cfg.grace_ms),
        };
        let orchestrator = Orchestrator::new(store, Normalizer::new(team))
            .with_settings(settings)
            .with_locks(self.locks.clone());
        Ok(Pipeline::new(
            orchestrator,
            jobs,
            Duration::from_secs(cfg.budget_secs),
        ))
    }
}
