//! SQLite store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, Result as SqlResult, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::models::*;
use super::store::{Store, StoreError};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Thread-safe SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    // --- Sites ---

    fn get_sites(&self) -> Result<Vec<Site>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, url, name, type_id, active, created_at, updated_at FROM sites ORDER BY name",
        )?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    fn get_site(&self, id: &str) -> Result<Site, StoreError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, url, name, type_id, active, created_at, updated_at FROM sites WHERE id = ?1",
            params![id],
            site_from_row,
        )
        .map_err(not_found)
    }

    fn add_site(&self, site: &Site) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sites (id, url, name, type_id, active, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                site.id,
                site.url,
                site.name,
                site.type_id,
                site.active,
                site.created_at.map(format_db_time),
                site.updated_at.map(format_db_time),
            ],
        )
        .map_err(|e| already_exists(e, &site.id))?;
        Ok(())
    }

    fn update_site(&self, site: &Site) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sites SET url=?1, name=?2, type_id=?3, active=?4, updated_at=?5 WHERE id=?6",
            params![
                site.url,
                site.name,
                site.type_id,
                site.active,
                site.updated_at.map(format_db_time),
                site.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete_site(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM sites WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        conn.execute("DELETE FROM site_status WHERE site_id = ?1", params![id])?;
        Ok(())
    }

    // --- Site types ---

    fn get_site_types(&self) -> Result<Vec<SiteType>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, color, description FROM site_types ORDER BY name")?;
        let types = stmt
            .query_map([], |row| {
                Ok(SiteType {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    color: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(types)
    }

    fn add_site_type(&self, site_type: &SiteType) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO site_types (id, name, color, description) VALUES (?1, ?2, ?3, ?4)",
            params![
                site_type.id,
                site_type.name,
                site_type.color,
                site_type.description,
            ],
        )
        .map_err(|e| already_exists(e, &site_type.id.to_string()))?;
        Ok(())
    }

    fn update_site_type(&self, site_type: &SiteType) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE site_types SET name=?1, color=?2, description=?3 WHERE id=?4",
            params![
                site_type.name,
                site_type.color,
                site_type.description,
                site_type.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete_site_type(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM site_types WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // --- Status snapshot ---

    fn load_previous_statuses(&self) -> Result<HashMap<String, SiteStatus>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT site_id, payload FROM site_status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut statuses = HashMap::with_capacity(rows.len());
        for (site_id, payload) in rows {
            match serde_json::from_str::<SiteStatus>(&payload) {
                Ok(status) => {
                    statuses.insert(site_id, status);
                }
                Err(e) => tracing::warn!("Skipping unreadable status for {}: {}", site_id, e),
            }
        }
        Ok(statuses)
    }

    fn persist_statuses(&self, statuses: &HashMap<String, SiteStatus>) -> Result<(), StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM site_status", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO site_status (site_id, payload) VALUES (?1, ?2)")?;
            for (site_id, status) in statuses {
                stmt.execute(params![site_id, serde_json::to_string(status)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- Offline ledger ---

    fn load_incident_ledger(&self) -> Result<Vec<OfflineIncident>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, site_id, site_name, url, went_offline_at, went_online_at, duration, status_code, error
             FROM offline_incidents ORDER BY position ASC",
        )?;
        let ledger = stmt
            .query_map([], |row| {
                let went_offline_at: String = row.get(4)?;
                let went_online_at: Option<String> = row.get(5)?;
                let status_code: Option<i64> = row.get(7)?;
                Ok(OfflineIncident {
                    id: row.get(0)?,
                    site_id: row.get(1)?,
                    site_name: row.get(2)?,
                    url: row.get(3)?,
                    went_offline_at: parse_db_time(&went_offline_at).unwrap_or_else(Utc::now),
                    went_online_at: went_online_at.and_then(|s| parse_db_time(&s)),
                    duration: row.get(6)?,
                    status_code: status_code.and_then(|c| u16::try_from(c).ok()),
                    error: row.get(8)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ledger)
    }

    fn persist_incident_ledger(&self, ledger: &[OfflineIncident]) -> Result<(), StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM offline_incidents", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO offline_incidents
                 (position, id, site_id, site_name, url, went_offline_at, went_online_at, duration, status_code, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for (position, incident) in ledger.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    incident.id,
                    incident.site_id,
                    incident.site_name,
                    incident.url,
                    format_db_time(incident.went_offline_at),
                    incident.went_online_at.map(format_db_time),
                    incident.duration,
                    incident.status_code,
                    incident.error,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- Slow log ---

    fn load_slow_log(&self) -> Result<Vec<SlowEvent>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, site_id, site_name, url, timestamp, response_time
             FROM slow_events ORDER BY position ASC",
        )?;
        let log = stmt
            .query_map([], |row| {
                let timestamp: String = row.get(4)?;
                let response_time: i64 = row.get(5)?;
                Ok(SlowEvent {
                    id: row.get(0)?,
                    site_id: row.get(1)?,
                    site_name: row.get(2)?,
                    url: row.get(3)?,
                    timestamp: parse_db_time(&timestamp).unwrap_or_else(Utc::now),
                    response_time: response_time.max(0) as u64,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(log)
    }

    fn persist_slow_log(&self, log: &[SlowEvent]) -> Result<(), StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM slow_events", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO slow_events (position, id, site_id, site_name, url, timestamp, response_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (position, event) in log.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    event.id,
                    event.site_id,
                    event.site_name,
                    event.url,
                    format_db_time(event.timestamp),
                    event.response_time as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn site_from_row(row: &Row<'_>) -> SqlResult<Site> {
    let created_at: Option<String> = row.get(5)?;
    let updated_at: Option<String> = row.get(6)?;
    Ok(Site {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        type_id: row.get(3)?,
        active: row.get(4)?,
        created_at: created_at.and_then(|s| parse_db_time(&s)),
        updated_at: updated_at.and_then(|s| parse_db_time(&s)),
    })
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

fn already_exists(e: rusqlite::Error, id: &str) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::AlreadyExists(id.to_string())
        }
        other => StoreError::Sqlite(other),
    }
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
