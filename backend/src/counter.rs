//! Per-session booking counters.
//!
//! The primary path is a single atomic clamped UPDATE in the fast store.
//! When that path fails and the fallback is enabled, a fetch-update-set loop
//! is used instead; the caller holds the session lock, which is the only
//! reason a read-modify-write is tolerated here. A periodic reconciliation
//! pass recounts Active bookings and repairs drift in both stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, anyhow};
use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::booking::repository::BookingRepository;
use crate::crm::{CrmClient, ObjectType};
use crate::metrics::counters::Counters;
use crate::session::repository::SessionRepository;

pub struct BookingCounter {
    sessions: Arc<dyn SessionRepository>,
    fallback_enabled: bool,
    counters: Counters,
}

impl BookingCounter {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        fallback_enabled: bool,
        counters: Counters,
    ) -> Self {
        Self {
            sessions,
            fallback_enabled,
            counters,
        }
    }

    /// Atomic increment; returns the post-value.
    pub async fn increment(&self, session_hubspot_id: &str, delta: u32) -> anyhow::Result<i64> {
        self.adjust(session_hubspot_id, i64::from(delta)).await
    }

    /// Atomic decrement, clamped at zero; returns the post-value.
    pub async fn decrement(&self, session_hubspot_id: &str, delta: u32) -> anyhow::Result<i64> {
        self.adjust(session_hubspot_id, -i64::from(delta)).await
    }

    /// Overwrite; reconciliation only.
    pub async fn set(&self, session_hubspot_id: &str, value: i64) -> anyhow::Result<()> {
        self.sessions.set_total(session_hubspot_id, value).await
    }

    #[instrument(skip(self), target = "counter", fields(session_id = %session_hubspot_id, delta))]
    async fn adjust(&self, session_hubspot_id: &str, delta: i64) -> anyhow::Result<i64> {
        match self.sessions.adjust_total(session_hubspot_id, delta).await {
            Ok(Some(new_count)) => {
                debug!(new_count, "counter adjusted atomically");
                Ok(new_count)
            }
            Ok(None) => Err(anyhow!("session {session_hubspot_id} not projected")),
            Err(primary_err) => {
                if !self.fallback_enabled {
                    return Err(primary_err).context("atomic counter adjust failed");
                }

                self.counters.counter_fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %primary_err, "atomic counter unavailable; using locked fetch-update-set");

                // valid only because the caller holds the session lock
                let session = self
                    .sessions
                    .fetch_by_hubspot_id(session_hubspot_id)
                    .await?
                    .ok_or_else(|| anyhow!("session {session_hubspot_id} not projected"))?;

                let new_count = (i64::from(session.total_bookings) + delta).max(0);
                self.sessions.set_total(session_hubspot_id, new_count).await?;
                Ok(new_count)
            }
        }
    }
}

/* =========================
Reconciliation
========================= */

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub repaired: usize,
}

/// Recounts Active bookings for recently written sessions and repairs
/// `total_bookings` in the fast store and the CRM.
pub struct CounterReconciler {
    crm: Arc<dyn CrmClient>,
    sessions: Arc<dyn SessionRepository>,
    bookings: Arc<dyn BookingRepository>,
    batch_size: usize,
    counters: Counters,
}

impl CounterReconciler {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        sessions: Arc<dyn SessionRepository>,
        bookings: Arc<dyn BookingRepository>,
        batch_size: usize,
        counters: Counters,
    ) -> Self {
        Self {
            crm,
            sessions,
            bookings,
            batch_size,
            counters,
        }
    }

    #[instrument(skip(self), target = "reconcile")]
    pub async fn run_once(&self, lookback: Duration) -> anyhow::Result<ReconcileReport> {
        let since = Utc::now() - lookback;
        let sessions = self
            .sessions
            .recently_updated(since, self.batch_size)
            .await
            .context("load sessions for reconciliation")?;

        let mut report = ReconcileReport {
            checked: sessions.len(),
            repaired: 0,
        };

        for session in sessions {
            let actual = self
                .bookings
                .count_active_for_session(&session.hubspot_id)
                .await?;

            if actual == i64::from(session.total_bookings) {
                continue;
            }

            info!(
                session_id = %session.hubspot_id,
                stored = session.total_bookings,
                actual,
                "counter drift detected; repairing"
            );

            self.sessions.set_total(&session.hubspot_id, actual).await?;
            self.crm
                .update(
                    ObjectType::MockExam,
                    &session.hubspot_id,
                    HashMap::from([("total_bookings".to_string(), actual.to_string())]),
                )
                .await?;

            self.counters.reconcile_repairs.fetch_add(1, Ordering::Relaxed);
            report.repaired += 1;
        }

        Ok(report)
    }

    /// Fixed-cadence reconciliation loop.
    pub fn spawn(self: Arc<Self>, tick: std::time::Duration, lookback: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                match self.run_once(lookback).await {
                    Ok(report) if report.repaired > 0 => {
                        info!(checked = report.checked, repaired = report.repaired, "reconciliation pass complete");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "reconciliation pass failed"),
                }
            }
        });
    }
}
