//! Heuristic signals derived from an already-fetched HTTP response.
//!
//! Every predicate here is pure: no I/O, no panics. A missing signal is
//! `false` or `None`. The header names, vendor substrings and CDN hosts
//! come from [`SignalRules`] so deployments can tune them.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::{HeaderMap, CACHE_CONTROL, SERVER, VIA};
use serde::{Deserialize, Serialize};

use super::ProbeError;

/// Version marker used when a CDN asset carries no version token.
pub const DEFAULT_CDN_VERSION: &str = "Padrão";
/// Version marker used when a CDN host is mentioned but no asset URL is found.
pub const DETECTED_CDN_VERSION: &str = "Detectado";

/// Lookup tables driving signal detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalRules {
    /// Headers whose presence means an edge protection layer answered.
    pub protection_headers: Vec<String>,
    /// `server`/`via` substrings naming an edge protection proxy.
    pub protection_servers: Vec<String>,
    /// Status codes typical of challenge or block pages.
    pub challenge_status_codes: Vec<u16>,
    /// Lowercase body substrings found on challenge pages.
    pub challenge_markers: Vec<String>,
    /// Pass the body to the anti-bot check.
    pub inspect_body_for_challenge: bool,
    pub front_door_headers: Vec<String>,
    pub front_door_servers: Vec<String>,
    pub cache_headers: Vec<String>,
    pub cdn_hosts: Vec<String>,
}

impl Default for SignalRules {
    fn default() -> Self {
        Self {
            protection_headers: strings(&["cf-ray", "cf-cache-status"]),
            protection_servers: strings(&["cloudflare"]),
            challenge_status_codes: vec![403, 503, 429],
            challenge_markers: strings(&[
                "cloudflare",
                "checking your browser",
                "ddos protection",
                "security check",
                "captcha",
            ]),
            inspect_body_for_challenge: false,
            front_door_headers: strings(&["x-azure-ref", "x-ms-ref"]),
            front_door_servers: strings(&["azure"]),
            cache_headers: strings(&["age", "x-cache", "cf-cache-status"]),
            cdn_hosts: strings(&["cdn.mjds.com.br", "ca.mjds.com.br", "cs.mjds.com.br"]),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl SignalRules {
    /// Load rules from a JSON file. Missing fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProbeError> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ProbeError::Config(format!("failed to read signal rules: {}", e)))?;
        serde_json::from_str(&data)
            .map_err(|e| ProbeError::Config(format!("invalid signal rules: {}", e)))
    }

    /// Compile the CDN host patterns once for repeated use.
    pub fn cdn_matcher(&self) -> CdnMatcher {
        CdnMatcher::new(&self.cdn_hosts)
    }
}

/// Cache timing values parsed from response headers, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheTimings {
    pub age: Option<u64>,
    pub max_age: Option<u64>,
}

/// CDN asset reference found in an HTML body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdnAsset {
    pub present: bool,
    pub version: Option<String>,
    pub link: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn has_any_header(headers: &HeaderMap, names: &[String]) -> bool {
    names.iter().any(|name| headers.contains_key(name.as_str()))
}

/// True if `server` or `via` mentions any of `needles`, case-insensitively.
fn proxy_named(headers: &HeaderMap, needles: &[String]) -> bool {
    [SERVER, VIA].into_iter().any(|name| {
        header_str(headers, name)
            .map(|value| {
                let value = value.to_ascii_lowercase();
                needles.iter().any(|n| value.contains(&n.to_ascii_lowercase()))
            })
            .unwrap_or(false)
    })
}

/// Detect an edge protection / anti-bot layer in front of the site.
pub fn detect_anti_bot_protection(
    headers: &HeaderMap,
    status_code: u16,
    body: Option<&str>,
    rules: &SignalRules,
) -> bool {
    if has_any_header(headers, &rules.protection_headers) {
        return true;
    }
    if proxy_named(headers, &rules.protection_servers) {
        return true;
    }
    if rules.challenge_status_codes.contains(&status_code) {
        return true;
    }

    match body {
        Some(body) if !body.is_empty() => {
            let body = body.to_lowercase();
            rules
                .challenge_markers
                .iter()
                .any(|marker| body.contains(&marker.to_lowercase()))
        }
        _ => false,
    }
}

/// Detect a front-door reverse proxy.
pub fn detect_front_door_proxy(headers: &HeaderMap, rules: &SignalRules) -> bool {
    has_any_header(headers, &rules.front_door_headers) || proxy_named(headers, &rules.front_door_servers)
}

/// Detect an edge cache between client and origin.
pub fn detect_edge_cache(headers: &HeaderMap, rules: &SignalRules) -> bool {
    if has_any_header(headers, &rules.cache_headers) {
        return true;
    }
    header_str(headers, CACHE_CONTROL)
        .map(|v| v.contains("max-age"))
        .unwrap_or(false)
}

/// Parse `age` and the `max-age` directive of `cache-control`.
pub fn extract_cache_timings(headers: &HeaderMap) -> CacheTimings {
    static MAX_AGE: OnceLock<Regex> = OnceLock::new();
    let max_age_re = MAX_AGE.get_or_init(|| Regex::new(r"max-age=(\d+)").unwrap());

    let age = header_str(headers, "age").and_then(parse_leading_int);
    let max_age = header_str(headers, CACHE_CONTROL)
        .and_then(|cc| max_age_re.captures(cc))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());

    CacheTimings { age, max_age }
}

/// Integer prefix of a header value, e.g. `"120, 130"` → 120.
fn parse_leading_int(value: &str) -> Option<u64> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Asset patterns for one CDN host, matched case-insensitively.
#[derive(Debug, Clone)]
struct CdnHostPatterns {
    host: String,
    mention: Regex,
    /// Absolute URL first, then protocol-relative, then bare host.
    assets: Vec<Regex>,
}

impl CdnHostPatterns {
    fn compile(host: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(host);
        let assets = [
            format!(r#"(?i)https?://{}[^"'\s]+"#, escaped),
            format!(r#"(?i)//{}[^"'\s]+"#, escaped),
            format!(r#"(?i){}[^"'\s]+"#, escaped),
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            host: host.to_string(),
            mention: Regex::new(&format!("(?i){}", escaped))?,
            assets,
        })
    }
}

/// Pre-compiled matcher for the CDN hosts of a rule set.
#[derive(Debug, Clone)]
pub struct CdnMatcher {
    hosts: Vec<CdnHostPatterns>,
}

impl CdnMatcher {
    pub fn new(hosts: &[String]) -> Self {
        let hosts = hosts
            .iter()
            .filter(|h| !h.is_empty())
            .filter_map(|h| match CdnHostPatterns::compile(h) {
                Ok(patterns) => Some(patterns),
                Err(e) => {
                    tracing::warn!("Ignoring CDN host {:?}: {}", h, e);
                    None
                }
            })
            .collect();
        Self { hosts }
    }
}

/// Find the first asset URL under a known CDN host and its version token.
pub fn detect_cdn_asset(body: &str, cdn: &CdnMatcher) -> CdnAsset {
    if body.is_empty() {
        return CdnAsset::default();
    }

    for host in &cdn.hosts {
        if !host.mention.is_match(body) {
            continue;
        }

        let asset = host
            .assets
            .iter()
            .find_map(|re| re.find(body).map(|m| m.as_str().to_string()));

        return match asset {
            Some(asset) => CdnAsset {
                present: true,
                version: Some(
                    extract_asset_version(&asset).unwrap_or_else(|| DEFAULT_CDN_VERSION.to_string()),
                ),
                link: Some(absolute_https(&asset)),
            },
            None => CdnAsset {
                present: true,
                version: Some(DETECTED_CDN_VERSION.to_string()),
                link: Some(format!("https://{}", host.host)),
            },
        };
    }

    CdnAsset::default()
}

fn extract_asset_version(asset: &str) -> Option<String> {
    static VERSION_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = VERSION_PATTERNS.get_or_init(|| {
        [
            r#"(?i)[?&]v=([^"'\s&]+)"#,
            r#"(?i)[?&]version=([^"'\s&]+)"#,
            r#"(?i)[?&]ver=([^"'\s&]+)"#,
            r"(?i)v(\d{6})",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });

    patterns.iter().find_map(|re| {
        re.captures(asset)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn absolute_https(asset: &str) -> String {
    let lower = asset.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        asset.to_string()
    } else if let Some(rest) = asset.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!("https://{}", asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn cdn() -> CdnMatcher {
        SignalRules::default().cdn_matcher()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_anti_bot_by_header() {
        let rules = SignalRules::default();
        assert!(detect_anti_bot_protection(&headers(&[("cf-ray", "8a1b-GRU")]), 200, None, &rules));
        assert!(detect_anti_bot_protection(&headers(&[("server", "Cloudflare")]), 200, None, &rules));
        assert!(detect_anti_bot_protection(&headers(&[("via", "1.1 CLOUDFLARE")]), 200, None, &rules));
        assert!(!detect_anti_bot_protection(&headers(&[("server", "nginx")]), 200, None, &rules));
    }

    #[test]
    fn test_anti_bot_by_status_code() {
        let rules = SignalRules::default();
        let empty = HeaderMap::new();
        for code in [403, 429, 503] {
            assert!(detect_anti_bot_protection(&empty, code, None, &rules), "{}", code);
        }
        for code in [200, 404, 500, 502] {
            assert!(!detect_anti_bot_protection(&empty, code, None, &rules), "{}", code);
        }
    }

    #[test]
    fn test_anti_bot_by_body_marker() {
        let rules = SignalRules::default();
        let empty = HeaderMap::new();
        let body = "<title>Just a moment...</title><p>Checking your browser before accessing</p>";
        assert!(detect_anti_bot_protection(&empty, 200, Some(body), &rules));
        assert!(!detect_anti_bot_protection(&empty, 200, Some("<h1>Welcome</h1>"), &rules));
        assert!(!detect_anti_bot_protection(&empty, 200, Some(""), &rules));
    }

    #[test]
    fn test_front_door_detection() {
        let rules = SignalRules::default();
        assert!(detect_front_door_proxy(&headers(&[("x-azure-ref", "0abc")]), &rules));
        assert!(detect_front_door_proxy(&headers(&[("x-ms-ref", "xyz")]), &rules));
        assert!(detect_front_door_proxy(&headers(&[("server", "Microsoft-Azure-Application-Gateway/v2")]), &rules));
        assert!(!detect_front_door_proxy(&headers(&[("server", "Apache")]), &rules));
    }

    #[test]
    fn test_rule_header_names_are_case_insensitive() {
        let rules = SignalRules {
            front_door_headers: vec!["X-Edge-Request-Id".to_string()],
            ..Default::default()
        };
        assert!(detect_front_door_proxy(&headers(&[("x-edge-request-id", "1")]), &rules));
    }

    #[test]
    fn test_edge_cache_detection() {
        let rules = SignalRules::default();
        assert!(detect_edge_cache(&headers(&[("age", "12")]), &rules));
        assert!(detect_edge_cache(&headers(&[("x-cache", "HIT")]), &rules));
        assert!(detect_edge_cache(&headers(&[("cf-cache-status", "DYNAMIC")]), &rules));
        assert!(detect_edge_cache(&headers(&[("cache-control", "public, max-age=600")]), &rules));
        assert!(!detect_edge_cache(&headers(&[("cache-control", "no-store")]), &rules));
        assert!(!detect_edge_cache(&HeaderMap::new(), &rules));
    }

    #[test]
    fn test_extract_cache_timings() {
        let timings = extract_cache_timings(&headers(&[
            ("age", "42"),
            ("cache-control", "public, s-maxage=10, max-age=3600"),
        ]));
        assert_eq!(timings, CacheTimings { age: Some(42), max_age: Some(3600) });

        let none = extract_cache_timings(&headers(&[("age", "soon"), ("cache-control", "no-cache")]));
        assert_eq!(none, CacheTimings::default());
    }

    #[test]
    fn test_cdn_asset_with_query_version() {
        let body = r#"<link rel="stylesheet" href="https://cdn.mjds.com.br/portal/site.css?v=2024.05.1">"#;
        let asset = detect_cdn_asset(body, &cdn());
        assert!(asset.present);
        assert_eq!(asset.version.as_deref(), Some("2024.05.1"));
        assert_eq!(
            asset.link.as_deref(),
            Some("https://cdn.mjds.com.br/portal/site.css?v=2024.05.1")
        );
    }

    #[test]
    fn test_cdn_asset_protocol_relative_with_path_version() {
        let body = r#"<script src="//cs.mjds.com.br/js/v240611/app.js"></script>"#;
        let asset = detect_cdn_asset(body, &cdn());
        assert_eq!(asset.version.as_deref(), Some("240611"));
        assert_eq!(asset.link.as_deref(), Some("https://cs.mjds.com.br/js/v240611/app.js"));
    }

    #[test]
    fn test_cdn_asset_without_version_uses_default_marker() {
        let body = r#"<img src="https://ca.mjds.com.br/img/logo.png">"#;
        let asset = detect_cdn_asset(body, &cdn());
        assert_eq!(asset.version.as_deref(), Some(DEFAULT_CDN_VERSION));
    }

    #[test]
    fn test_cdn_host_mentioned_without_asset() {
        let body = r#"<a href="cdn.mjds.com.br">CDN</a>"#;
        let asset = detect_cdn_asset(body, &cdn());
        assert!(asset.present);
        assert_eq!(asset.version.as_deref(), Some(DETECTED_CDN_VERSION));
        assert_eq!(asset.link.as_deref(), Some("https://cdn.mjds.com.br"));
    }

    #[test]
    fn test_cdn_host_matches_any_case() {
        let body = r#"<script src="HTTPS://CDN.MJDS.COM.BR/js/app.js?v=9.1"></script>"#;
        let asset = detect_cdn_asset(body, &cdn());
        assert!(asset.present);
        assert_eq!(asset.version.as_deref(), Some("9.1"));
        assert_eq!(asset.link.as_deref(), Some("HTTPS://CDN.MJDS.COM.BR/js/app.js?v=9.1"));

        let custom = CdnMatcher::new(&["Static.Example.NET".to_string(), String::new()]);
        let asset = detect_cdn_asset(r#"<img src="//static.example.net/a.png">"#, &custom);
        assert_eq!(asset.link.as_deref(), Some("https://static.example.net/a.png"));
    }

    #[test]
    fn test_cdn_absent() {
        let asset = detect_cdn_asset("<html><body>plain</body></html>", &cdn());
        assert_eq!(asset, CdnAsset::default());
        assert_eq!(detect_cdn_asset("", &cdn()), CdnAsset::default());
    }

    #[test]
    fn test_rules_from_file_keep_defaults_for_missing_fields() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, br#"{"cdn_hosts": ["static.example.net"]}"#).unwrap();
        let rules = SignalRules::from_file(tmp.path()).unwrap();
        assert_eq!(rules.cdn_hosts, vec!["static.example.net".to_string()]);
        assert_eq!(rules.challenge_status_codes, vec![403, 503, 429]);

        assert!(SignalRules::from_file("/nonexistent/rules.json").is_err());
    }
}
