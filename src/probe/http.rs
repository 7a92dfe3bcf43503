//! HTTP probe implementation.

use std::error::Error as _;
use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Url};

use super::ProbeError;

/// Maximum number of redirects followed for a single check.
pub const MAX_REDIRECTS: usize = 5;

/// Realistic desktop browser user agents; one is picked per request.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0",
];

/// What came back from a completed GET.
#[derive(Debug, Clone)]
pub struct HttpObservation {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Build the shared probe client. Every status code is a valid response,
/// so only transport failures come back as errors.
pub fn build_probe_client(timeout: Duration, use_system_proxy: bool) -> Result<Client, ProbeError> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .redirect(redirect::Policy::limited(MAX_REDIRECTS));
    if !use_system_proxy {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|e| ProbeError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Browser-like request headers with a random user agent.
pub fn browser_headers() -> HeaderMap {
    let user_agent = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);

    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(user_agent));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("pt-BR,pt;q=0.9,en;q=0.8,es;q=0.7"),
    );
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static("document"));
    headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("navigate"));
    headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static("none"));
    headers.insert(HeaderName::from_static("sec-fetch-user"), HeaderValue::from_static("?1"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}

/// Run one GET against `url` and read the full body.
pub async fn fetch_page(client: &Client, url: Url, timeout: Duration) -> Result<HttpObservation, ProbeError> {
    let response = client
        .get(url)
        .headers(browser_headers())
        .send()
        .await
        .map_err(|e| map_request_error(e, timeout))?;

    let status_code = response.status().as_u16();
    let headers = response.headers().clone();

    // Read the full body to measure complete transfer time
    let body = response
        .text()
        .await
        .map_err(|e| map_request_error(e, timeout))?;

    Ok(HttpObservation {
        status_code,
        headers,
        body,
    })
}

fn map_request_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        return ProbeError::Timeout(timeout);
    }

    // reqwest's own message omits the cause ("error sending request for url")
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ProbeError::Network(message)
}
