//! Configuration module for sitewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::probe::SignalRules;
use crate::scheduler::IncidentPolicy;

/// Which persistence backend to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Json,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "file" => Ok(StorageBackend::Json),
            "sqlite" | "db" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Persistence backend (default: JSON files)
    pub storage: StorageBackend,
    /// Directory holding the JSON collections (default: "data")
    pub data_dir: PathBuf,
    /// Path to the SQLite database file (default: "sitewatch.db")
    pub db_path: String,
    /// Response time at which an answering site counts as slow
    pub slow_threshold_ms: u64,
    /// Request timeout; responses at least this slow count as offline
    pub offline_threshold_ms: u64,
    /// Seconds between scheduled check cycles, 0 disables them
    pub check_interval_secs: u64,
    pub incident_policy: IncidentPolicy,
    pub signal_rules: SignalRules,
    /// Honor HTTP(S)_PROXY for outbound probes
    pub use_system_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            storage: StorageBackend::Json,
            data_dir: PathBuf::from("data"),
            db_path: "sitewatch.db".to_string(),
            slow_threshold_ms: 10_000,
            offline_threshold_ms: 30_000,
            check_interval_secs: 60,
            incident_policy: IncidentPolicy::Reachable,
            signal_rules: SignalRules::default(),
            use_system_proxy: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SITEWATCH_STORAGE`: `json` or `sqlite` (default: json)
    /// - `SITEWATCH_DATA_DIR`: JSON data directory (default: "data")
    /// - `SITEWATCH_DB_PATH`: Database file path (default: "sitewatch.db")
    /// - `SITEWATCH_SLOW_THRESHOLD_MS`: slow threshold (default: 10000)
    /// - `SITEWATCH_OFFLINE_THRESHOLD_MS`: offline threshold and timeout (default: 30000)
    /// - `SITEWATCH_CHECK_INTERVAL_SECS`: check interval (default: 60)
    /// - `SITEWATCH_INCIDENT_POLICY`: `strict` or `reachable` (default: reachable)
    /// - `SITEWATCH_SIGNAL_RULES`: JSON file overriding the detection tables
    /// - `SITEWATCH_USE_SYSTEM_PROXY`: `true`/`false` (default: true)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("SITEWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(storage) = parse_var("SITEWATCH_STORAGE") {
            cfg.storage = storage;
        }

        if let Ok(data_dir) = env::var("SITEWATCH_DATA_DIR") {
            cfg.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(db_path) = env::var("SITEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(ms) = parse_var("SITEWATCH_SLOW_THRESHOLD_MS") {
            cfg.slow_threshold_ms = ms;
        }

        if let Some(ms) = parse_var("SITEWATCH_OFFLINE_THRESHOLD_MS") {
            cfg.offline_threshold_ms = ms;
        }

        if let Some(secs) = parse_var("SITEWATCH_CHECK_INTERVAL_SECS") {
            cfg.check_interval_secs = secs;
        }

        if let Some(policy) = parse_var("SITEWATCH_INCIDENT_POLICY") {
            cfg.incident_policy = policy;
        }

        if let Some(enabled) = parse_var("SITEWATCH_USE_SYSTEM_PROXY") {
            cfg.use_system_proxy = enabled;
        }

        if let Ok(path) = env::var("SITEWATCH_SIGNAL_RULES") {
            match SignalRules::from_file(&path) {
                Ok(rules) => cfg.signal_rules = rules,
                Err(e) => tracing::warn!("Ignoring signal rules from {}: {}", path, e),
            }
        }

        cfg
    }

    /// Non-fatal configuration problems worth logging at startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.slow_threshold_ms > self.offline_threshold_ms {
            warnings.push(format!(
                "slow threshold ({}ms) is above the offline threshold ({}ms); slow sites will time out before they are reported slow",
                self.slow_threshold_ms, self.offline_threshold_ms
            ));
        }
        if self.offline_threshold_ms == 0 {
            warnings.push("offline threshold is 0ms; every request will time out".to_string());
        }
        warnings
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.storage, StorageBackend::Json);
        assert_eq!(cfg.db_path, "sitewatch.db");
        assert_eq!(cfg.slow_threshold_ms, 10_000);
        assert_eq!(cfg.offline_threshold_ms, 30_000);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!(" json ".parse::<StorageBackend>().unwrap(), StorageBackend::Json);
        assert!("supabase".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_validate_flags_inverted_thresholds() {
        let cfg = ServerConfig {
            slow_threshold_ms: 40_000,
            offline_threshold_ms: 20_000,
            ..Default::default()
        };
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("40000ms"));
    }
}
