// src/ingest/providers/mod.rs
pub mod api_football;
pub mod news_api;

use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderKind};
use crate::ingest::types::SourceProvider;

pub use api_football::{ApiFootballProvider, TeamIdCache};
pub use news_api::NewsApiProvider;

/// Fresh HTTP-backed provider for one run. `team_id` carries a team id
/// resolved by an earlier run; only api-football uses it.
pub fn from_config(
    cfg: &ProviderConfig,
    team_name: &str,
    team_id: TeamIdCache,
) -> Arc<dyn SourceProvider> {
    match cfg.kind {
        ProviderKind::NewsApi => Arc::new(NewsApiProvider::from_config(cfg)),
        ProviderKind::ApiFootball => Arc::new(
            ApiFootballProvider::from_config(cfg, team_name).with_team_id_cache(team_id),
        ),
    }
}
