//! Scheduler module for running check cycles and driving the incident
//! tracker.

mod transitions;

pub use transitions::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::db::{SiteState, SiteStatus, Store, StoreError};
use crate::history::IncidentTracker;
use crate::probe::{check_all, SiteProber};

/// Outcome of a single check cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub statuses: Vec<SiteStatus>,
    pub went_offline: usize,
    pub went_online: usize,
    pub slow: usize,
}

/// Runs check cycles, periodically and on demand.
pub struct Scheduler {
    store: Arc<dyn Store>,
    prober: Arc<SiteProber>,
    tracker: Arc<Mutex<IncidentTracker>>,
    policy: IncidentPolicy,
    interval: Duration,
    cycle_lock: Mutex<()>,
    stop_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        prober: Arc<SiteProber>,
        tracker: Arc<Mutex<IncidentTracker>>,
        policy: IncidentPolicy,
        interval: Duration,
    ) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            store,
            prober,
            tracker,
            policy,
            interval,
            cycle_lock: Mutex::new(()),
            stop_tx,
        }
    }

    pub fn tracker(&self) -> Arc<Mutex<IncidentTracker>> {
        self.tracker.clone()
    }

    /// Check every active site once and record what changed.
    ///
    /// Cycles never overlap; a second caller waits for the running one.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let _guard = self.cycle_lock.lock().await;

        let sites = self.store.load_active_sites()?;
        let statuses = check_all(self.prober.clone(), &sites).await;

        let previous = self.store.load_previous_statuses().unwrap_or_else(|e| {
            tracing::warn!("Failed to load previous statuses, treating all as online: {}", e);
            HashMap::new()
        });

        let mut report = CycleReport::default();
        {
            let mut tracker = self.tracker.lock().await;
            for status in &statuses {
                // An open incident outranks the snapshot, which skips inactive sites.
                let before = if tracker.open_incident(&status.id).is_some() {
                    Some(SiteState::Offline)
                } else {
                    previous.get(&status.id).map(|s| s.status)
                };
                match detect_transition(self.policy, before, status.status) {
                    Transition::WentOffline => {
                        let code = (status.status_code != 0).then_some(status.status_code);
                        if tracker.site_went_offline(
                            &status.id,
                            &status.name,
                            &status.url,
                            code,
                            status.error.clone(),
                        ) {
                            report.went_offline += 1;
                        }
                    }
                    Transition::WentOnline => {
                        if tracker.site_went_online(&status.id).is_some() {
                            report.went_online += 1;
                        }
                    }
                    Transition::Unchanged => {}
                }

                if status.status == SiteState::Slow {
                    tracker.record_slow(&status.id, &status.name, &status.url, status.response_time);
                    report.slow += 1;
                }
            }
        }

        let snapshot: HashMap<String, SiteStatus> = statuses
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        if let Err(e) = self.store.persist_statuses(&snapshot) {
            tracing::error!("Failed to persist site statuses: {}", e);
        }

        tracing::info!(
            "Checked {} sites: {} went offline, {} back online, {} slow",
            statuses.len(),
            report.went_offline,
            report.went_online,
            report.slow
        );

        report.statuses = statuses;
        Ok(report)
    }

    /// Start the periodic loop. A zero interval leaves it disabled.
    pub fn start(self: &Arc<Self>) {
        if self.interval.is_zero() {
            tracing::info!("Periodic checks disabled");
            return;
        }

        tracing::info!("Starting scheduler, checking every {:?}", self.interval);

        let scheduler = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Scheduler stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.run_cycle().await {
                            tracing::error!("Check cycle failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}
