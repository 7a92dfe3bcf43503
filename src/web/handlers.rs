//! HTTP request handlers.

use super::AppState;
use crate::db::{OfflineStats, Site, SiteType, StoreError};
use crate::history::{render_offline_log, render_slow_log, LogKind, DEFAULT_OFFLINE_WINDOW_DAYS};
use crate::probe::parse_site_url;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Templates (simple string replacement)
// ============================================================================

const DASHBOARD_TEMPLATE: &str = include_str!("templates/dashboard.html");
const HISTORY_TEMPLATE: &str = include_str!("templates/history.html");
const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_TYPE_COLOR: &str = "#000000";

// ============================================================================
// Response envelope
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<OfflineStats>,
    /// Seconds offline for the filtered site over the requested window.
    #[serde(rename = "totalOfflineTime", skip_serializing_if = "Option::is_none")]
    pub total_offline_time: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            stats: None,
            total_offline_time: None,
            timestamp: Utc::now(),
        }
    }
}

fn success<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::ok(data)).into_response()
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(error.into()),
        message: None,
        stats: None,
        total_offline_time: None,
        timestamp: Utc::now(),
    };
    (status, Json(body)).into_response()
}

fn store_failure(e: StoreError) -> Response {
    match e {
        StoreError::NotFound => failure(StatusCode::NOT_FOUND, "not found"),
        StoreError::AlreadyExists(id) => failure(StatusCode::CONFLICT, format!("{} already exists", id)),
        e => {
            tracing::error!("Store operation failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Pages
// ============================================================================

fn render_page(title: &str, content: &str) -> Html<String> {
    Html(
        LAYOUT_TEMPLATE
            .replace("{{title}}", title)
            .replace("{{content}}", content),
    )
}

pub async fn handle_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let content = DASHBOARD_TEMPLATE
        .replace("{{slow_threshold_ms}}", &state.config.slow_threshold_ms.to_string())
        .replace("{{offline_threshold_ms}}", &state.config.offline_threshold_ms.to_string())
        .replace("{{check_interval_secs}}", &state.config.check_interval_secs.to_string());

    render_page("Site Status", &content)
}

pub async fn handle_history_page() -> impl IntoResponse {
    render_page("Offline History", HISTORY_TEMPLATE)
}

// ============================================================================
// API: Sites
// ============================================================================

pub async fn handle_get_sites(State(state): State<AppState>) -> Response {
    match state.store.get_sites() {
        Ok(sites) => success(sites),
        Err(e) => store_failure(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "nome")]
    pub name: Option<String>,
    #[serde(default, rename = "tipo_id")]
    pub type_id: Option<i64>,
}

fn generate_site_id() -> String {
    format!(
        "{:x}{:04x}",
        Utc::now().timestamp_millis(),
        rand::random::<u16>()
    )
}

pub async fn handle_create_site(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> Response {
    let (url, name, type_id) = match (
        non_empty(req.url),
        non_empty(req.name),
        req.type_id.filter(|id| *id != 0),
    ) {
        (Some(url), Some(name), Some(type_id)) => (url, name, type_id),
        _ => return failure(StatusCode::BAD_REQUEST, "url, nome and tipo_id are required"),
    };

    if let Err(e) = parse_site_url(&url) {
        return failure(StatusCode::BAD_REQUEST, e.to_string());
    }

    let now = Utc::now();
    let site = Site {
        id: generate_site_id(),
        url,
        name,
        type_id,
        active: true,
        created_at: Some(now),
        updated_at: Some(now),
    };

    match state.store.add_site(&site) {
        Ok(()) => {
            tracing::info!("Added site {} ({})", site.name, site.url);
            success(site)
        }
        Err(e) => store_failure(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateSiteRequest {
    pub url: Option<String>,
    #[serde(rename = "nome")]
    pub name: Option<String>,
    #[serde(rename = "tipo_id")]
    pub type_id: Option<i64>,
    #[serde(rename = "ativo")]
    pub active: Option<bool>,
}

pub async fn handle_update_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateSiteRequest>,
) -> Response {
    let mut site = match state.store.get_site(&id) {
        Ok(s) => s,
        Err(e) => return store_failure(e),
    };

    if let Some(url) = non_empty(req.url) {
        if let Err(e) = parse_site_url(&url) {
            return failure(StatusCode::BAD_REQUEST, e.to_string());
        }
        site.url = url;
    }
    if let Some(name) = non_empty(req.name) {
        site.name = name;
    }
    if let Some(type_id) = req.type_id {
        site.type_id = type_id;
    }
    if let Some(active) = req.active {
        site.active = active;
    }
    site.updated_at = Some(Utc::now());

    match state.store.update_site(&site) {
        Ok(()) => success(site),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_delete_site(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_site(&id) {
        Ok(()) => {
            tracing::info!("Removed site {}", id);
            state.scheduler.tracker().lock().await.site_removed(&id);
            success(id)
        }
        Err(e) => store_failure(e),
    }
}

// ============================================================================
// API: Site types
// ============================================================================

pub async fn handle_get_types(State(state): State<AppState>) -> Response {
    match state.store.get_site_types() {
        Ok(types) => success(types),
        Err(e) => store_failure(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SiteTypeRequest {
    #[serde(rename = "nome")]
    pub name: Option<String>,
    #[serde(rename = "cor")]
    pub color: Option<String>,
    #[serde(rename = "descricao")]
    pub description: Option<String>,
}

/// Millisecond timestamp ids, bumped past the largest id already taken.
fn next_type_id(existing: &[SiteType], now_millis: i64) -> i64 {
    existing
        .iter()
        .map(|t| t.id + 1)
        .max()
        .map_or(now_millis, |next| next.max(now_millis))
}

pub async fn handle_create_type(
    State(state): State<AppState>,
    Json(req): Json<SiteTypeRequest>,
) -> Response {
    let Some(name) = non_empty(req.name) else {
        return failure(StatusCode::BAD_REQUEST, "nome is required");
    };

    let existing = match state.store.get_site_types() {
        Ok(t) => t,
        Err(e) => return store_failure(e),
    };

    let site_type = SiteType {
        id: next_type_id(&existing, Utc::now().timestamp_millis()),
        name,
        color: non_empty(req.color).unwrap_or_else(|| DEFAULT_TYPE_COLOR.to_string()),
        description: req.description.unwrap_or_default(),
    };

    match state.store.add_site_type(&site_type) {
        Ok(()) => success(site_type),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_update_type(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SiteTypeRequest>,
) -> Response {
    let types = match state.store.get_site_types() {
        Ok(t) => t,
        Err(e) => return store_failure(e),
    };
    let Some(mut site_type) = types.into_iter().find(|t| t.id == id) else {
        return failure(StatusCode::NOT_FOUND, "site type not found");
    };

    if let Some(name) = non_empty(req.name) {
        site_type.name = name;
    }
    if let Some(color) = non_empty(req.color) {
        site_type.color = color;
    }
    if let Some(description) = req.description {
        site_type.description = description;
    }

    match state.store.update_site_type(&site_type) {
        Ok(()) => success(site_type),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_delete_type(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_site_type(id) {
        Ok(()) => success(id),
        Err(e) => store_failure(e),
    }
}

// ============================================================================
// API: Checks
// ============================================================================

pub async fn handle_run_checks(State(state): State<AppState>) -> Response {
    match state.scheduler.run_cycle().await {
        Ok(report) if report.statuses.is_empty() => {
            let mut body = ApiResponse::ok(report.statuses);
            body.message = Some("no active sites to check".to_string());
            Json(body).into_response()
        }
        Ok(report) => success(report.statuses),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_get_statuses(State(state): State<AppState>) -> Response {
    match state.store.load_previous_statuses() {
        Ok(statuses) => success(statuses),
        Err(e) => store_failure(e),
    }
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryQuery {
    pub site_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<usize>,
    pub days: Option<i64>,
}

/// Accept RFC 3339 or a bare `YYYY-MM-DD`; bare end dates cover the whole day.
fn parse_date_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let naive = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(Utc.from_utc_datetime(&naive))
}

pub async fn handle_offline_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let range = match (query.start_date.as_deref(), query.end_date.as_deref()) {
        (Some(start), Some(end)) => {
            match (parse_date_bound(start, false), parse_date_bound(end, true)) {
                (Some(s), Some(e)) => Some((s, e)),
                _ => return failure(StatusCode::BAD_REQUEST, "invalid startDate or endDate"),
            }
        }
        _ => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let tracker = state.scheduler.tracker();
    let tracker = tracker.lock().await;

    let mut history = match range {
        Some((start, end)) => tracker.offline_history_by_date_range(start, end),
        None => tracker.offline_history(None),
    };
    if let Some(site_id) = query.site_id.as_deref() {
        history.retain(|i| i.site_id == site_id);
    }
    history.reverse();
    history.truncate(limit);

    let total_offline_time = query.site_id.as_deref().map(|site_id| {
        tracker.total_offline_time(site_id, query.days.unwrap_or(DEFAULT_OFFLINE_WINDOW_DAYS))
    });

    let mut body = ApiResponse::ok(history);
    body.stats = Some(tracker.offline_stats());
    body.total_offline_time = total_offline_time;
    Json(body).into_response()
}

pub async fn handle_slow_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let tracker = state.scheduler.tracker();
    let tracker = tracker.lock().await;

    let mut history = tracker.slow_history(query.site_id.as_deref());
    history.reverse();
    history.truncate(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    success(history)
}

pub async fn handle_download_log(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let kind: LogKind = match kind.parse() {
        Ok(k) => k,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e),
    };

    let tracker = state.scheduler.tracker();
    let tracker = tracker.lock().await;
    let text = match kind {
        LogKind::Offline => render_offline_log(&tracker.offline_history(None)),
        LogKind::Slow => render_slow_log(&tracker.slow_history(None)),
    };

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", kind.file_name()),
            ),
        ],
        text,
    )
        .into_response()
}

// ============================================================================
// API: Health
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub backend: &'static str,
    pub degraded: bool,
    pub sites: usize,
    pub current_offline: usize,
}

pub async fn handle_health(State(state): State<AppState>) -> Response {
    let sites = match state.store.get_sites() {
        Ok(s) => s.len(),
        Err(e) => return store_failure(e),
    };
    let current_offline = state.scheduler.tracker().lock().await.current_offline_sites().len();

    success(HealthReport {
        backend: state.store.backend_name(),
        degraded: state.store.is_degraded(),
        sites,
        current_offline,
    })
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <circle cx="50" cy="50" r="45" fill="#2e9d5b"/>
        <path d="M20 55 L35 55 L45 30 L55 75 L65 50 L80 50" stroke="white" stroke-width="6" fill="none"/>
    </svg>"##;

    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}
