//! Bounded fire-and-forget projection workers.
//!
//! Every CRM-first write enqueues a projection job here instead of spawning
//! a task. The queue is bounded: when it is full the job is dropped and
//! counted, and the reconciliation pass repairs the projection later.
//! Workers never fail the enqueueing caller.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::booking::model::Booking;
use crate::booking::repository::BookingRepository;
use crate::contact::model::Contact;
use crate::contact::repository::ContactRepository;
use crate::metrics::counters::Counters;
use crate::session::model::Session;
use crate::session::repository::SessionRepository;

#[derive(Clone, Debug)]
pub enum SyncJob {
    ProjectSession(Session),
    ProjectBooking(Booking),
    ProjectContact(Contact),
}

impl SyncJob {
    fn label(&self) -> &'static str {
        match self {
            Self::ProjectSession(_) => "project_session",
            Self::ProjectBooking(_) => "project_booking",
            Self::ProjectContact(_) => "project_contact",
        }
    }
}

/// Cheap handle used by stores and the coordinator to hand off projections.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncJob>,
    counters: Counters,
}

impl SyncHandle {
    /// Non-blocking enqueue. A full queue drops the job.
    pub fn enqueue(&self, job: SyncJob) {
        let label = job.label();
        if self.tx.try_send(job).is_err() {
            self.counters.sync_jobs_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(job = label, "projection queue full; job dropped");
        }
    }
}

pub struct ProjectionPool {
    sessions: Arc<dyn SessionRepository>,
    bookings: Arc<dyn BookingRepository>,
    contacts: Arc<dyn ContactRepository>,
    counters: Counters,
}

impl ProjectionPool {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        bookings: Arc<dyn BookingRepository>,
        contacts: Arc<dyn ContactRepository>,
        counters: Counters,
    ) -> Self {
        Self {
            sessions,
            bookings,
            contacts,
            counters,
        }
    }

    /// Spawns `workers` drainers over one bounded queue and returns the
    /// enqueue handle.
    pub fn spawn(self, workers: usize, capacity: usize) -> SyncHandle {
        let (tx, rx) = mpsc::channel::<SyncJob>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let pool = Arc::new(self);

        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let pool = Arc::clone(&pool);

            tokio::spawn(async move {
                info!(worker_id, "projection worker started");
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        debug!(worker_id, "projection queue closed; worker exiting");
                        break;
                    };
                    pool.run_job(job).await;
                }
            });
        }

        SyncHandle {
            tx,
            counters: pool.counters.clone(),
        }
    }

    async fn run_job(&self, job: SyncJob) {
        let label = job.label();

        let result = match job {
            SyncJob::ProjectSession(session) => self.sessions.upsert(&session).await,
            SyncJob::ProjectBooking(booking) => self.bookings.upsert(&booking).await,
            SyncJob::ProjectContact(contact) => self.contacts.upsert(&contact).await,
        };

        match result {
            Ok(()) => debug!(job = label, "projection applied"),
            Err(e) => {
                self.counters.sync_jobs_failed.fetch_add(1, Ordering::Relaxed);
                warn!(job = label, error = %e, "projection failed; reconciliation will repair");
            }
        }
    }
}
