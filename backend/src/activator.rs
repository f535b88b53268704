//! Scheduled session activation.
//!
//! Every tick: find `scheduled` sessions whose activation datetime has
//! elapsed and flip them to `true` in CRM batches. A partially failed sweep
//! leaves the stragglers `scheduled`, so the next tick retries them; the
//! sweep is idempotent across ticks.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::metrics::counters::Counters;
use crate::session::repository::SessionRepository;
use crate::session::store::{ActivationReport, SessionStore};

/// How many due sessions one sweep will pick up. Anything beyond this waits
/// for the next tick.
const SWEEP_LIMIT: usize = 1000;

pub struct ScheduledActivator {
    store: Arc<SessionStore>,
    repo: Arc<dyn SessionRepository>,
    counters: Counters,
}

impl ScheduledActivator {
    pub fn new(store: Arc<SessionStore>, counters: Counters) -> Self {
        let repo = store.repo();
        Self {
            store,
            repo,
            counters,
        }
    }

    /// One activation sweep. Safe to call concurrently with bookings: it
    /// only touches `is_active` and never moves counters.
    #[instrument(skip(self), target = "activator")]
    pub async fn run_once(&self) -> Result<ActivationReport, EngineError> {
        let due = self
            .repo
            .fetch_due_scheduled(Utc::now(), SWEEP_LIMIT)
            .await?;

        if due.is_empty() {
            debug!("no sessions due for activation");
            return Ok(ActivationReport::default());
        }

        let ids: Vec<String> = due.iter().map(|s| s.hubspot_id.clone()).collect();
        info!(count = ids.len(), "activating due sessions");

        let report = self.store.activate_batch(&ids).await?;

        self.counters
            .sessions_activated
            .fetch_add(report.activated as u64, Ordering::Relaxed);

        if report.failed > 0 {
            warn!(
                failed = report.failed,
                activated = report.activated,
                "activation sweep partially failed; retrying next tick"
            );
        }

        Ok(report)
    }

    /// Fixed-cadence activation loop.
    pub fn spawn(self: Arc<Self>, tick: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "activation sweep failed");
                }
            }
        });
    }
}
