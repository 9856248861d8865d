pub mod ingest;

pub use ingest::{IngestConfig, ProviderConfig, ProviderKind, StoreConfig, TrackedTeamConfig};
