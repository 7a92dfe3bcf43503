//! Site prober: one classified check per site.

use std::time::Instant;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, CACHE_CONTROL, DATE, LAST_MODIFIED};
use reqwest::Client;

use super::{
    build_probe_client, detect_anti_bot_protection, detect_cdn_asset, detect_edge_cache,
    detect_front_door_proxy, extract_cache_timings, fetch_page, parse_site_url, resolve_host,
    CdnMatcher, HttpObservation, ProbeError, ProbeSettings,
};
use crate::db::{Site, SiteState, SiteStatus};

/// Checks sites with a shared HTTP client.
pub struct SiteProber {
    client: Client,
    settings: ProbeSettings,
    cdn: CdnMatcher,
}

impl SiteProber {
    pub fn new(settings: ProbeSettings) -> Result<Self, ProbeError> {
        let client = build_probe_client(settings.offline_threshold, settings.use_system_proxy)?;
        let cdn = settings.rules.cdn_matcher();
        Ok(Self {
            client,
            settings,
            cdn,
        })
    }

    /// Check one site. Never fails: unreachable sites come back `offline`
    /// with status code 0 and the failure in `error`.
    pub async fn check(&self, site: &Site) -> SiteStatus {
        let start = Instant::now();
        let last_checked = Utc::now();

        let status = match self.observe(site).await {
            Ok(observation) => self.assess_response(
                site,
                &observation,
                start.elapsed().as_millis() as u64,
                last_checked,
            ),
            Err(e) => SiteStatus::unreachable(
                site,
                e.to_string(),
                start.elapsed().as_millis() as u64,
                last_checked,
            ),
        };

        tracing::debug!(
            "Checked {} ({}): {} code={} in {}ms",
            site.name,
            site.url,
            status.status,
            status.status_code,
            status.response_time
        );
        status
    }

    async fn observe(&self, site: &Site) -> Result<HttpObservation, ProbeError> {
        let url = parse_site_url(&site.url)?;
        resolve_host(&url).await?;
        fetch_page(&self.client, url, self.settings.offline_threshold).await
    }

    /// Build the full status snapshot for a received response.
    pub fn assess_response(
        &self,
        site: &Site,
        observation: &HttpObservation,
        response_time_ms: u64,
        last_checked: DateTime<Utc>,
    ) -> SiteStatus {
        let settings = &self.settings;
        let rules = &settings.rules;
        let headers = &observation.headers;
        let body = rules
            .inspect_body_for_challenge
            .then_some(observation.body.as_str());

        let anti_bot = detect_anti_bot_protection(headers, observation.status_code, body, rules);
        let status = classify_response(
            observation.status_code,
            anti_bot,
            response_time_ms,
            settings.slow_threshold_ms(),
            settings.offline_threshold_ms(),
        );

        let cdn = detect_cdn_asset(&observation.body, &self.cdn);
        let timings = extract_cache_timings(headers);
        let header_string = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        SiteStatus {
            id: site.id.clone(),
            url: site.url.clone(),
            name: site.name.clone(),
            type_id: site.type_id,
            status,
            status_code: observation.status_code,
            response_time: response_time_ms,
            last_checked,
            error: None,
            cdn_version: cdn.version,
            cdn_link: cdn.link,
            cache_control: header_string(CACHE_CONTROL),
            last_modified: header_string(LAST_MODIFIED).or_else(|| header_string(DATE)),
            is_azure_front_door: detect_front_door_proxy(headers, rules),
            is_using_cache: detect_edge_cache(headers, rules),
            cache_age: timings.age,
            cache_max_age: timings.max_age,
        }
    }
}

/// Classify a response that did arrive.
///
/// Precedence: anti-bot protection, then HTTP errors (429 is rate
/// limiting, anything else ≥ 400 is offline), then timing. A response at
/// or past the offline threshold is offline even when it is also past the
/// slow threshold, so the offline test runs before the slow one rather
/// than after it.
pub fn classify_response(
    status_code: u16,
    anti_bot: bool,
    response_time_ms: u64,
    slow_threshold_ms: u64,
    offline_threshold_ms: u64,
) -> SiteState {
    if anti_bot {
        return SiteState::RateLimited;
    }
    if status_code >= 400 {
        return if status_code == 429 {
            SiteState::RateLimited
        } else {
            SiteState::Offline
        };
    }
    if response_time_ms >= offline_threshold_ms {
        SiteState::Offline
    } else if response_time_ms >= slow_threshold_ms {
        SiteState::Slow
    } else {
        SiteState::Online
    }
}
