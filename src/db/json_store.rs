//! JSON-file store.
//!
//! Each collection lives in its own pretty-printed file under the data
//! directory. The files are read once at construction into an in-memory
//! mirror; reads are always served from the mirror and writes go to the
//! mirror first, then to disk. When a disk write fails the store keeps
//! working from memory and reports itself degraded.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::models::*;
use super::store::{Store, StoreError};

const SITES_FILE: &str = "sites.json";
const TYPES_FILE: &str = "tipos.json";
const STATUS_FILE: &str = "monitoramento.json";
const OFFLINE_FILE: &str = "offline_history.json";
const SLOW_FILE: &str = "slow_history.json";

#[derive(Default)]
struct Collections {
    sites: Vec<Site>,
    site_types: Vec<SiteType>,
    statuses: HashMap<String, SiteStatus>,
    incidents: Vec<OfflineIncident>,
    slow_events: Vec<SlowEvent>,
}

/// Write-through JSON store with an in-memory fallback.
pub struct JsonFileStore {
    dir: PathBuf,
    state: Mutex<Collections>,
    degraded: AtomicBool,
}

impl JsonFileStore {
    /// Load every collection found in `dir`. Never fails: unreadable files
    /// start empty and an unusable directory leaves the store degraded.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let degraded = match fs::create_dir_all(&dir) {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!(
                    "Data directory {} unavailable, keeping data in memory: {}",
                    dir.display(),
                    e
                );
                true
            }
        };

        let state = Collections {
            sites: read_collection(&dir.join(SITES_FILE)),
            site_types: read_collection(&dir.join(TYPES_FILE)),
            statuses: read_collection(&dir.join(STATUS_FILE)),
            incidents: read_collection(&dir.join(OFFLINE_FILE)),
            slow_events: read_collection(&dir.join(SLOW_FILE)),
        };

        Self {
            dir,
            state: Mutex::new(state),
            degraded: AtomicBool::new(degraded),
        }
    }

    fn state(&self) -> MutexGuard<'_, Collections> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Best-effort write of one collection. A failure flips the store into
    /// degraded mode; the in-memory copy stays authoritative.
    fn write<T: Serialize + ?Sized>(&self, file: &str, value: &T) {
        let path = self.dir.join(file);
        let result = serde_json::to_string_pretty(value)
            .map_err(StoreError::from)
            .and_then(|json| fs::write(&path, json).map_err(StoreError::from));

        if let Err(e) = result {
            if !self.degraded.swap(true, Ordering::SeqCst) {
                tracing::warn!("Switching to in-memory storage after failed write");
            }
            tracing::warn!("Failed to write {}: {}", path.display(), e);
        }
    }
}

fn read_collection<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }

    let parsed = fs::read_to_string(path)
        .map_err(StoreError::from)
        .and_then(|data| serde_json::from_str(&data).map_err(StoreError::from));

    match parsed {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to load {}, starting empty: {}", path.display(), e);
            T::default()
        }
    }
}

impl Store for JsonFileStore {
    fn backend_name(&self) -> &'static str {
        "json"
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    // --- Sites ---

    fn get_sites(&self) -> Result<Vec<Site>, StoreError> {
        let mut sites = self.state().sites.clone();
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }

    fn get_site(&self, id: &str) -> Result<Site, StoreError> {
        self.state()
            .sites
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn add_site(&self, site: &Site) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.sites.iter().any(|s| s.id == site.id) {
            return Err(StoreError::AlreadyExists(site.id.clone()));
        }
        state.sites.push(site.clone());
        self.write(SITES_FILE, &state.sites);
        Ok(())
    }

    fn update_site(&self, site: &Site) -> Result<(), StoreError> {
        let mut state = self.state();
        let existing = state
            .sites
            .iter_mut()
            .find(|s| s.id == site.id)
            .ok_or(StoreError::NotFound)?;
        *existing = site.clone();
        self.write(SITES_FILE, &state.sites);
        Ok(())
    }

    fn delete_site(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let before = state.sites.len();
        state.sites.retain(|s| s.id != id);
        if state.sites.len() == before {
            return Err(StoreError::NotFound);
        }
        self.write(SITES_FILE, &state.sites);
        if state.statuses.remove(id).is_some() {
            self.write(STATUS_FILE, &state.statuses);
        }
        Ok(())
    }

    // --- Site types ---

    fn get_site_types(&self) -> Result<Vec<SiteType>, StoreError> {
        let mut types = self.state().site_types.clone();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    fn add_site_type(&self, site_type: &SiteType) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.site_types.iter().any(|t| t.id == site_type.id) {
            return Err(StoreError::AlreadyExists(site_type.id.to_string()));
        }
        state.site_types.push(site_type.clone());
        self.write(TYPES_FILE, &state.site_types);
        Ok(())
    }

    fn update_site_type(&self, site_type: &SiteType) -> Result<(), StoreError> {
        let mut state = self.state();
        let existing = state
            .site_types
            .iter_mut()
            .find(|t| t.id == site_type.id)
            .ok_or(StoreError::NotFound)?;
        *existing = site_type.clone();
        self.write(TYPES_FILE, &state.site_types);
        Ok(())
    }

    fn delete_site_type(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state();
        let before = state.site_types.len();
        state.site_types.retain(|t| t.id != id);
        if state.site_types.len() == before {
            return Err(StoreError::NotFound);
        }
        self.write(TYPES_FILE, &state.site_types);
        Ok(())
    }

    // --- Status snapshot, ledger and slow log ---

    fn load_previous_statuses(&self) -> Result<HashMap<String, SiteStatus>, StoreError> {
        Ok(self.state().statuses.clone())
    }

    fn persist_statuses(&self, statuses: &HashMap<String, SiteStatus>) -> Result<(), StoreError> {
        let mut state = self.state();
        state.statuses = statuses.clone();
        self.write(STATUS_FILE, &state.statuses);
        Ok(())
    }

    fn load_incident_ledger(&self) -> Result<Vec<OfflineIncident>, StoreError> {
        Ok(self.state().incidents.clone())
    }

    fn persist_incident_ledger(&self, ledger: &[OfflineIncident]) -> Result<(), StoreError> {
        let mut state = self.state();
        state.incidents = ledger.to_vec();
        self.write(OFFLINE_FILE, &state.incidents);
        Ok(())
    }

    fn load_slow_log(&self) -> Result<Vec<SlowEvent>, StoreError> {
        Ok(self.state().slow_events.clone())
    }

    fn persist_slow_log(&self, log: &[SlowEvent]) -> Result<(), StoreError> {
        let mut state = self.state();
        state.slow_events = log.to_vec();
        self.write(SLOW_FILE, &state.slow_events);
        Ok(())
    }
}
