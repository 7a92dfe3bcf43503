//! Store abstraction shared by every persistence backend.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::models::*;
use super::{JsonFileStore, SqliteStore};
use crate::config::{ServerConfig, StorageBackend};

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

/// Persistence collaborator for sites, site types, the status snapshot,
/// the offline ledger and the slow log.
pub trait Store: Send + Sync {
    /// Short backend identifier shown on the health endpoint.
    fn backend_name(&self) -> &'static str;

    /// True when the last write did not reach durable storage and the
    /// store is serving an in-memory copy.
    fn is_degraded(&self) -> bool {
        false
    }

    fn get_sites(&self) -> Result<Vec<Site>, StoreError>;
    fn get_site(&self, id: &str) -> Result<Site, StoreError>;
    fn add_site(&self, site: &Site) -> Result<(), StoreError>;
    fn update_site(&self, site: &Site) -> Result<(), StoreError>;
    fn delete_site(&self, id: &str) -> Result<(), StoreError>;

    fn get_site_types(&self) -> Result<Vec<SiteType>, StoreError>;
    fn add_site_type(&self, site_type: &SiteType) -> Result<(), StoreError>;
    fn update_site_type(&self, site_type: &SiteType) -> Result<(), StoreError>;
    fn delete_site_type(&self, id: i64) -> Result<(), StoreError>;

    /// Sites that should be probed this cycle.
    fn load_active_sites(&self) -> Result<Vec<Site>, StoreError> {
        Ok(self.get_sites()?.into_iter().filter(|s| s.active).collect())
    }

    fn load_previous_statuses(&self) -> Result<HashMap<String, SiteStatus>, StoreError>;
    fn persist_statuses(&self, statuses: &HashMap<String, SiteStatus>) -> Result<(), StoreError>;

    fn load_incident_ledger(&self) -> Result<Vec<OfflineIncident>, StoreError>;
    fn persist_incident_ledger(&self, ledger: &[OfflineIncident]) -> Result<(), StoreError>;

    fn load_slow_log(&self) -> Result<Vec<SlowEvent>, StoreError>;
    fn persist_slow_log(&self, log: &[SlowEvent]) -> Result<(), StoreError>;
}

/// Open the backend selected by the configuration.
pub fn open_store(cfg: &ServerConfig) -> Result<Arc<dyn Store>, StoreError> {
    match cfg.storage {
        StorageBackend::Json => {
            tracing::info!("Using JSON storage in {}", cfg.data_dir.display());
            Ok(Arc::new(JsonFileStore::new(&cfg.data_dir)))
        }
        StorageBackend::Sqlite => {
            tracing::info!("Using SQLite database at {}", cfg.db_path);
            Ok(Arc::new(SqliteStore::new(&cfg.db_path)?))
        }
    }
}
