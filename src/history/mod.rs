//! Offline incident ledger and slow-event log.
//!
//! The tracker owns both collections in memory and writes them back to the
//! store after every change. It never decides *when* a site changed state;
//! the check cycle detects transitions and calls in.

mod export;

pub use export::*;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::db::{OfflineIncident, OfflineStats, SlowEvent, Store};

/// Window used by [`IncidentTracker::total_offline_time`] when the caller
/// does not pick one.
pub const DEFAULT_OFFLINE_WINDOW_DAYS: i64 = 30;

/// Offline ledger plus slow log, persisted through a [`Store`].
pub struct IncidentTracker {
    store: Arc<dyn Store>,
    incidents: Vec<OfflineIncident>,
    slow_events: Vec<SlowEvent>,
}

impl IncidentTracker {
    /// Load both collections. Load failures start that collection empty.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let incidents = store.load_incident_ledger().unwrap_or_else(|e| {
            tracing::warn!("Failed to load offline history, starting empty: {}", e);
            Vec::new()
        });
        let slow_events = store.load_slow_log().unwrap_or_else(|e| {
            tracing::warn!("Failed to load slow history, starting empty: {}", e);
            Vec::new()
        });

        tracing::info!(
            "Loaded {} offline incidents ({} open) and {} slow events",
            incidents.len(),
            incidents.iter().filter(|i| i.is_open()).count(),
            slow_events.len()
        );

        Self {
            store,
            incidents,
            slow_events,
        }
    }

    /// Open an incident for the site unless one is already open.
    ///
    /// Returns true when a new incident was opened.
    pub fn site_went_offline(
        &mut self,
        site_id: &str,
        site_name: &str,
        url: &str,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> bool {
        self.site_went_offline_at(site_id, site_name, url, status_code, error, Utc::now())
    }

    pub fn site_went_offline_at(
        &mut self,
        site_id: &str,
        site_name: &str,
        url: &str,
        status_code: Option<u16>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.open_incident(site_id).is_some() {
            return false;
        }

        self.incidents.push(OfflineIncident {
            id: format!("{}_{}", site_id, now.timestamp_millis()),
            site_id: site_id.to_string(),
            site_name: site_name.to_string(),
            url: url.to_string(),
            went_offline_at: now,
            went_online_at: None,
            duration: None,
            status_code,
            error,
        });
        tracing::info!("{} ({}) went offline", site_name, url);
        self.save_incidents();
        true
    }

    /// Close the site's open incident.
    ///
    /// Returns the incident duration in whole seconds, or `None` if nothing
    /// was open.
    pub fn site_went_online(&mut self, site_id: &str) -> Option<i64> {
        self.site_went_online_at(site_id, Utc::now())
    }

    pub fn site_went_online_at(&mut self, site_id: &str, now: DateTime<Utc>) -> Option<i64> {
        let closed = self.close_incident(site_id, now)?;
        let duration = closed.duration.unwrap_or(0);
        tracing::info!(
            "{} ({}) back online after {}s",
            closed.site_name,
            closed.url,
            duration
        );
        Some(duration)
    }

    /// Close the open incident of a site that no longer exists.
    pub fn site_removed(&mut self, site_id: &str) -> Option<i64> {
        self.site_removed_at(site_id, Utc::now())
    }

    pub fn site_removed_at(&mut self, site_id: &str, now: DateTime<Utc>) -> Option<i64> {
        let closed = self.close_incident(site_id, now)?;
        let duration = closed.duration.unwrap_or(0);
        tracing::info!(
            "{} ({}) removed while offline, incident closed after {}s",
            closed.site_name,
            closed.url,
            duration
        );
        Some(duration)
    }

    fn close_incident(&mut self, site_id: &str, now: DateTime<Utc>) -> Option<OfflineIncident> {
        let incident = self
            .incidents
            .iter_mut()
            .find(|i| i.site_id == site_id && i.is_open())?;

        let duration = (now - incident.went_offline_at)
            .num_milliseconds()
            .div_euclid(1000)
            .max(0);
        incident.went_online_at = Some(now);
        incident.duration = Some(duration);
        let closed = incident.clone();

        self.save_incidents();
        Some(closed)
    }

    /// Append a slow event. Every call records one event.
    pub fn record_slow(&mut self, site_id: &str, site_name: &str, url: &str, response_time: u64) {
        self.record_slow_at(site_id, site_name, url, response_time, Utc::now());
    }

    pub fn record_slow_at(
        &mut self,
        site_id: &str,
        site_name: &str,
        url: &str,
        response_time: u64,
        now: DateTime<Utc>,
    ) {
        self.slow_events.push(SlowEvent {
            id: format!("{}_{}", site_id, now.timestamp_millis()),
            site_id: site_id.to_string(),
            site_name: site_name.to_string(),
            url: url.to_string(),
            timestamp: now,
            response_time,
        });
        tracing::debug!("{} ({}) slow: {}ms", site_name, url, response_time);
        self.save_slow_log();
    }

    /// The open incident for a site, if any.
    pub fn open_incident(&self, site_id: &str) -> Option<&OfflineIncident> {
        self.incidents
            .iter()
            .find(|i| i.site_id == site_id && i.is_open())
    }

    pub fn offline_stats(&self) -> OfflineStats {
        let closed: Vec<i64> = self.incidents.iter().filter_map(|i| i.duration).collect();
        let total_offline_time: i64 = closed.iter().sum();
        let average_downtime = if closed.is_empty() {
            0.0
        } else {
            total_offline_time as f64 / closed.len() as f64
        };

        OfflineStats {
            total_incidents: self.incidents.len(),
            current_offline: self.incidents.iter().filter(|i| i.is_open()).count(),
            total_offline_time,
            average_downtime,
        }
    }

    /// All incidents that have not closed yet.
    pub fn current_offline_sites(&self) -> Vec<OfflineIncident> {
        self.incidents.iter().filter(|i| i.is_open()).cloned().collect()
    }

    pub fn offline_history(&self, site_id: Option<&str>) -> Vec<OfflineIncident> {
        match site_id {
            Some(id) => self.incidents.iter().filter(|i| i.site_id == id).cloned().collect(),
            None => self.incidents.clone(),
        }
    }

    /// Incidents that went offline within `[start, end]`.
    pub fn offline_history_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<OfflineIncident> {
        self.incidents
            .iter()
            .filter(|i| i.went_offline_at >= start && i.went_offline_at <= end)
            .cloned()
            .collect()
    }

    /// Seconds offline over closed incidents opened in the last `days` days.
    pub fn total_offline_time(&self, site_id: &str, days: i64) -> i64 {
        self.total_offline_time_at(site_id, days, Utc::now())
    }

    pub fn total_offline_time_at(&self, site_id: &str, days: i64, now: DateTime<Utc>) -> i64 {
        let cutoff = now - ChronoDuration::days(days);
        self.incidents
            .iter()
            .filter(|i| i.site_id == site_id && i.went_offline_at >= cutoff)
            .filter_map(|i| i.duration)
            .sum()
    }

    pub fn slow_history(&self, site_id: Option<&str>) -> Vec<SlowEvent> {
        match site_id {
            Some(id) => self.slow_events.iter().filter(|e| e.site_id == id).cloned().collect(),
            None => self.slow_events.clone(),
        }
    }

    fn save_incidents(&self) {
        if let Err(e) = self.store.persist_incident_ledger(&self.incidents) {
            tracing::error!("Failed to persist offline history: {}", e);
        }
    }

    fn save_slow_log(&self) {
        if let Err(e) = self.store.persist_slow_log(&self.slow_events) {
            tracing::error!("Failed to persist slow history: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{JsonFileStore, Site, SiteStatus, SiteType, StoreError};
    use chrono::TimeZone;
    use std::collections::HashMap;

    /// A store whose every operation fails.
    pub(crate) struct BrokenStore;

    fn broken() -> StoreError {
        StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"))
    }

    impl Store for BrokenStore {
        fn backend_name(&self) -> &'static str {
            "broken"
        }
        fn get_sites(&self) -> Result<Vec<Site>, StoreError> {
            Err(broken())
        }
        fn get_site(&self, _id: &str) -> Result<Site, StoreError> {
            Err(broken())
        }
        fn add_site(&self, _site: &Site) -> Result<(), StoreError> {
            Err(broken())
        }
        fn update_site(&self, _site: &Site) -> Result<(), StoreError> {
            Err(broken())
        }
        fn delete_site(&self, _id: &str) -> Result<(), StoreError> {
            Err(broken())
        }
        fn get_site_types(&self) -> Result<Vec<SiteType>, StoreError> {
            Err(broken())
        }
        fn add_site_type(&self, _site_type: &SiteType) -> Result<(), StoreError> {
            Err(broken())
        }
        fn update_site_type(&self, _site_type: &SiteType) -> Result<(), StoreError> {
            Err(broken())
        }
        fn delete_site_type(&self, _id: i64) -> Result<(), StoreError> {
            Err(broken())
        }
        fn load_previous_statuses(&self) -> Result<HashMap<String, SiteStatus>, StoreError> {
            Err(broken())
        }
        fn persist_statuses(&self, _statuses: &HashMap<String, SiteStatus>) -> Result<(), StoreError> {
            Err(broken())
        }
        fn load_incident_ledger(&self) -> Result<Vec<OfflineIncident>, StoreError> {
            Err(broken())
        }
        fn persist_incident_ledger(&self, _ledger: &[OfflineIncident]) -> Result<(), StoreError> {
            Err(broken())
        }
        fn load_slow_log(&self) -> Result<Vec<SlowEvent>, StoreError> {
            Err(broken())
        }
        fn persist_slow_log(&self, _log: &[SlowEvent]) -> Result<(), StoreError> {
            Err(broken())
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    fn tracker() -> (tempfile::TempDir, Arc<JsonFileStore>, IncidentTracker) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let tracker = IncidentTracker::new(store.clone());
        (dir, store, tracker)
    }

    #[test]
    fn test_went_offline_is_idempotent() {
        let (_dir, _store, mut tracker) = tracker();
        assert!(tracker.site_went_offline_at("b", "B", "https://b.test", Some(500), None, at(10, 0, 0)));
        assert!(!tracker.site_went_offline_at("b", "B", "https://b.test", Some(502), None, at(10, 1, 0)));

        let open = tracker.current_offline_sites();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status_code, Some(500));
        assert_eq!(open[0].went_offline_at, at(10, 0, 0));
        assert_eq!(tracker.offline_stats().total_incidents, 1);
    }

    #[test]
    fn test_went_online_closes_with_floored_duration() {
        let (_dir, _store, mut tracker) = tracker();
        tracker.site_went_offline_at("b", "B", "https://b.test", Some(500), None, at(10, 0, 0));

        let back = at(10, 2, 5) + ChronoDuration::milliseconds(999);
        assert_eq!(tracker.site_went_online_at("b", back), Some(125));
        assert!(tracker.open_incident("b").is_none());

        let history = tracker.offline_history(Some("b"));
        assert_eq!(history[0].went_online_at, Some(back));
        assert_eq!(history[0].duration, Some(125));
    }

    #[test]
    fn test_went_online_without_open_incident_is_noop() {
        let (_dir, store, mut tracker) = tracker();
        assert_eq!(tracker.site_went_online("nobody"), None);
        assert!(store.load_incident_ledger().unwrap().is_empty());
    }

    #[test]
    fn test_removed_site_closes_open_incident() {
        let (_dir, store, mut tracker) = tracker();
        tracker.site_went_offline_at("gone", "Gone", "u", Some(502), None, at(9, 0, 0));

        assert_eq!(tracker.site_removed_at("gone", at(9, 5, 0)), Some(300));
        assert!(tracker.open_incident("gone").is_none());
        assert!(tracker.current_offline_sites().is_empty());
        assert_eq!(tracker.site_removed_at("gone", at(9, 6, 0)), None);

        let ledger = store.load_incident_ledger().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].duration, Some(300));
    }

    #[test]
    fn test_reopen_after_close_creates_new_incident() {
        let (_dir, _store, mut tracker) = tracker();
        tracker.site_went_offline_at("b", "B", "u", None, None, at(10, 0, 0));
        tracker.site_went_online_at("b", at(10, 0, 30));
        tracker.site_went_offline_at("b", "B", "u", None, Some("timeout".to_string()), at(11, 0, 0));

        let history = tracker.offline_history(Some("b"));
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_open());
        assert!(history[1].is_open());
        assert_eq!(history[1].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_offline_stats() {
        let (_dir, _store, mut tracker) = tracker();
        assert_eq!(
            tracker.offline_stats(),
            OfflineStats {
                total_incidents: 0,
                current_offline: 0,
                total_offline_time: 0,
                average_downtime: 0.0,
            }
        );

        tracker.site_went_offline_at("a", "A", "u", None, None, at(8, 0, 0));
        tracker.site_went_online_at("a", at(8, 1, 0));
        tracker.site_went_offline_at("b", "B", "u", None, None, at(9, 0, 0));
        tracker.site_went_online_at("b", at(9, 3, 0));
        tracker.site_went_offline_at("c", "C", "u", None, None, at(9, 30, 0));

        let stats = tracker.offline_stats();
        assert_eq!(stats.total_incidents, 3);
        assert_eq!(stats.current_offline, 1);
        assert_eq!(stats.current_offline, tracker.current_offline_sites().len());
        assert_eq!(stats.total_offline_time, 240);
        assert!((stats.average_downtime - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_second_incident_counts_as_closed() {
        let (_dir, _store, mut tracker) = tracker();
        tracker.site_went_offline_at("a", "A", "u", None, None, at(8, 0, 0));
        tracker.site_went_online_at("a", at(8, 0, 0) + ChronoDuration::milliseconds(400));
        tracker.site_went_offline_at("b", "B", "u", None, None, at(8, 0, 0));
        tracker.site_went_online_at("b", at(8, 0, 10));

        let stats = tracker.offline_stats();
        assert_eq!(stats.total_offline_time, 10);
        assert!((stats.average_downtime - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_filters() {
        let (_dir, _store, mut tracker) = tracker();
        tracker.site_went_offline_at("a", "A", "u", None, None, at(8, 0, 0));
        tracker.site_went_offline_at("b", "B", "u", None, None, at(9, 0, 0));
        tracker.site_went_offline_at("c", "C", "u", None, None, at(10, 0, 0));

        assert_eq!(tracker.offline_history(None).len(), 3);
        assert_eq!(tracker.offline_history(Some("b"))[0].site_name, "B");
        assert!(tracker.offline_history(Some("zzz")).is_empty());

        let ranged = tracker.offline_history_by_date_range(at(8, 0, 0), at(9, 0, 0));
        let ids: Vec<_> = ranged.iter().map(|i| i.site_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_total_offline_time_window() {
        let (_dir, _store, mut tracker) = tracker();
        let now = at(12, 0, 0);
        let old = now - ChronoDuration::days(40);
        tracker.site_went_offline_at("a", "A", "u", None, None, old);
        tracker.site_went_online_at("a", old + ChronoDuration::seconds(600));
        tracker.site_went_offline_at("a", "A", "u", None, None, at(11, 0, 0));
        tracker.site_went_online_at("a", at(11, 0, 45));
        tracker.site_went_offline_at("a", "A", "u", None, None, at(11, 30, 0));

        assert_eq!(tracker.total_offline_time_at("a", 30, now), 45);
        assert_eq!(tracker.total_offline_time_at("a", 60, now), 645);
    }

    #[test]
    fn test_record_slow_appends_every_time() {
        let (_dir, store, mut tracker) = tracker();
        tracker.record_slow_at("a", "A", "https://a.test", 12_000, at(8, 0, 0));
        tracker.record_slow_at("a", "A", "https://a.test", 13_000, at(8, 1, 0));
        tracker.record_slow_at("b", "B", "https://b.test", 11_000, at(8, 2, 0));

        assert_eq!(tracker.slow_history(None).len(), 3);
        assert_eq!(tracker.slow_history(Some("a")).len(), 2);
        assert_eq!(store.load_slow_log().unwrap().len(), 3);
    }

    #[test]
    fn test_ledger_survives_restart() {
        let (dir, _store, mut tracker) = tracker();
        tracker.site_went_offline_at("a", "A", "u", Some(503), None, at(8, 0, 0));
        tracker.site_went_online_at("a", at(8, 0, 30));
        tracker.site_went_offline_at("b", "B", "u", None, Some("refused".to_string()), at(9, 0, 0));
        let before = tracker.offline_history(None);

        let reloaded = IncidentTracker::new(Arc::new(JsonFileStore::new(dir.path())));
        assert_eq!(reloaded.offline_history(None), before);
        assert!(reloaded.open_incident("b").is_some());
    }

    #[test]
    fn test_broken_store_falls_back_to_memory() {
        let mut tracker = IncidentTracker::new(Arc::new(BrokenStore));
        assert!(tracker.offline_history(None).is_empty());

        assert!(tracker.site_went_offline("a", "A", "u", None, None));
        tracker.record_slow("a", "A", "u", 15_000);
        assert_eq!(tracker.offline_stats().current_offline, 1);
        assert!(tracker.site_went_online("a").is_some());
        assert_eq!(tracker.slow_history(None).len(), 1);
    }
}
