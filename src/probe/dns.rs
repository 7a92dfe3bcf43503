//! Connectivity pre-check: resolve the target host before any request.

use std::net::IpAddr;

use reqwest::Url;

use super::ProbeError;

/// Parse a site URL, accepting only http and https.
pub fn parse_site_url(raw: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(raw.trim()).map_err(|e| ProbeError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProbeError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                raw, other
            )))
        }
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ProbeError::InvalidUrl(format!("{}: missing host", raw)));
    }
    Ok(url)
}

/// Resolve the host of `url`, returning the first address found.
pub async fn resolve_host(url: &Url) -> Result<IpAddr, ProbeError> {
    let host = url
        .host_str()
        .ok_or_else(|| ProbeError::InvalidUrl(format!("{}: missing host", url)))?;

    // IPv6 literals come back bracketed from host_str
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(ip);
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let mut addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        tracing::debug!("DNS resolution failed for {}: {}", host, e);
        ProbeError::DnsUnresolved(host.to_string())
    })?;

    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ProbeError::DnsUnresolved(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_site_url() {
        tokio_test::assert_ok!(parse_site_url("https://example.com/path?q=1"));
        tokio_test::assert_ok!(parse_site_url(" http://example.com "));
        assert!(matches!(parse_site_url("example.com"), Err(ProbeError::InvalidUrl(_))));
        assert!(matches!(parse_site_url("ftp://example.com"), Err(ProbeError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_resolve_ip_literals_without_lookup() {
        let v4 = parse_site_url("http://127.0.0.1:9/").unwrap();
        assert_eq!(resolve_host(&v4).await.unwrap().to_string(), "127.0.0.1");

        let v6 = parse_site_url("http://[::1]:9/").unwrap();
        assert_eq!(resolve_host(&v6).await.unwrap().to_string(), "::1");
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let url = parse_site_url("https://no-such-host.invalid/").unwrap();
        let err = resolve_host(&url).await.unwrap_err();
        assert!(matches!(err, ProbeError::DnsUnresolved(_)));
        assert_eq!(err.to_string(), "DNS does not resolve");
    }
}
