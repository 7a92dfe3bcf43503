//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored web site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub url: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "tipo_id")]
    pub type_id: i64,
    #[serde(rename = "ativo", default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Default for Site {
    fn default() -> Self {
        Self {
            id: String::new(),
            url: String::new(),
            name: String::new(),
            type_id: 0,
            active: true,
            created_at: None,
            updated_at: None,
        }
    }
}

/// A category used to group sites on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteType {
    pub id: i64,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "cor", default = "default_color")]
    pub color: String,
    #[serde(rename = "descricao", default)]
    pub description: String,
}

pub(crate) fn default_color() -> String {
    "#000000".to_string()
}

/// Classification of a site after a check.
///
/// `Checking` and `Waiting` only exist for the UI before a real check has
/// completed; the prober never produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteState {
    Online,
    Offline,
    Slow,
    RateLimited,
    #[serde(rename = "verificando")]
    Checking,
    #[serde(rename = "aguardando")]
    Waiting,
}

impl SiteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteState::Online => "online",
            SiteState::Offline => "offline",
            SiteState::Slow => "slow",
            SiteState::RateLimited => "rate_limited",
            SiteState::Checking => "verificando",
            SiteState::Waiting => "aguardando",
        }
    }

    /// True for the states a real check can produce.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SiteState::Checking | SiteState::Waiting)
    }
}

impl std::fmt::Display for SiteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one site produced by a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    pub id: String,
    pub url: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "tipo_id")]
    pub type_id: i64,
    pub status: SiteState,
    pub status_code: u16,
    /// Wall-clock milliseconds from the start of the check to completion.
    pub response_time: u64,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub is_azure_front_door: bool,
    #[serde(default)]
    pub is_using_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_max_age: Option<u64>,
}

impl SiteStatus {
    /// Build an `offline` snapshot for a check that never got a response.
    pub fn unreachable(
        site: &Site,
        error: String,
        response_time: u64,
        last_checked: DateTime<Utc>,
    ) -> Self {
        Self {
            id: site.id.clone(),
            url: site.url.clone(),
            name: site.name.clone(),
            type_id: site.type_id,
            status: SiteState::Offline,
            status_code: 0,
            response_time,
            last_checked,
            error: Some(error),
            cdn_version: None,
            cdn_link: None,
            cache_control: None,
            last_modified: None,
            is_azure_front_door: false,
            is_using_cache: false,
            cache_age: None,
            cache_max_age: None,
        }
    }
}

/// One continuous offline period of a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineIncident {
    pub id: String,
    pub site_id: String,
    pub site_name: String,
    pub url: String,
    pub went_offline_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub went_online_at: Option<DateTime<Utc>>,
    /// Whole seconds offline, set when the incident closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OfflineIncident {
    pub fn is_open(&self) -> bool {
        self.went_online_at.is_none()
    }
}

/// A single check that classified a site as slow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowEvent {
    pub id: String,
    pub site_id: String,
    pub site_name: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub response_time: u64,
}

/// Aggregates over the offline ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineStats {
    pub total_incidents: usize,
    pub current_offline: usize,
    /// Seconds, summed over closed incidents.
    pub total_offline_time: i64,
    /// Seconds, averaged over closed incidents.
    pub average_downtime: f64,
}
