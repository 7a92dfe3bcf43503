//! Concurrent fan-out of the prober over a site list.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::SiteProber;
use crate::db::{Site, SiteStatus};

/// Check every active site concurrently and return the results in input
/// order. A probe task that dies still yields an `offline` status.
pub async fn check_all(prober: Arc<SiteProber>, sites: &[Site]) -> Vec<SiteStatus> {
    let active: Vec<Site> = sites.iter().filter(|s| s.active).cloned().collect();

    let handles: Vec<_> = active
        .iter()
        .cloned()
        .map(|site| {
            let prober = prober.clone();
            tokio::spawn(async move {
                // Add jitter to avoid thundering herd
                let jitter = rand::random::<u64>() % 100;
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                prober.check(&site).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (site, handle) in active.iter().zip(handles) {
        match handle.await {
            Ok(status) => results.push(status),
            Err(e) => {
                tracing::error!("Probe task failed for {}: {}", site.name, e);
                results.push(SiteStatus::unreachable(
                    site,
                    format!("probe task failed: {}", e),
                    0,
                    Utc::now(),
                ));
            }
        }
    }
    results
}
