//! Probe module for site monitoring.
//!
//! A check is a DNS pre-check followed by a single HTTP GET whose response
//! is classified by heuristics over status code, timing and headers.

mod batch;
mod dns;
mod http;
mod prober;
mod signals;

pub use batch::*;
pub use dns::*;
pub use http::*;
pub use prober::*;
pub use signals::*;

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
///
/// These never escape a check: the prober folds them into an `offline`
/// status whose `error` is the display string.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("DNS does not resolve")]
    DnsUnresolved(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Thresholds and client options shared by every check.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub slow_threshold: Duration,
    /// Also the request timeout.
    pub offline_threshold: Duration,
    pub rules: SignalRules,
    pub use_system_proxy: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(10_000),
            offline_threshold: Duration::from_millis(30_000),
            rules: SignalRules::default(),
            use_system_proxy: true,
        }
    }
}

impl ProbeSettings {
    pub fn from_config(cfg: &crate::config::ServerConfig) -> Self {
        Self {
            slow_threshold: Duration::from_millis(cfg.slow_threshold_ms),
            offline_threshold: Duration::from_millis(cfg.offline_threshold_ms),
            rules: cfg.signal_rules.clone(),
            use_system_proxy: cfg.use_system_proxy,
        }
    }

    pub fn slow_threshold_ms(&self) -> u64 {
        self.slow_threshold.as_millis() as u64
    }

    pub fn offline_threshold_ms(&self) -> u64 {
        self.offline_threshold.as_millis() as u64
    }
}
