use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub bookings_created: Arc<AtomicU64>,
    pub bookings_cancelled: Arc<AtomicU64>,
    pub bookings_rebooked: Arc<AtomicU64>,
    pub idempotent_hits: Arc<AtomicU64>,

    pub cleanups_performed: Arc<AtomicU64>,
    pub cleanups_failed: Arc<AtomicU64>,

    pub counter_fallbacks: Arc<AtomicU64>,
    pub lock_failures: Arc<AtomicU64>,

    pub sessions_activated: Arc<AtomicU64>,
    pub reconcile_repairs: Arc<AtomicU64>,

    pub sync_jobs_dropped: Arc<AtomicU64>,
    pub sync_jobs_failed: Arc<AtomicU64>,
}
