#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string for the fast store.
    pub database_url: String,

    /// Base URL of the CRM-of-record API.
    pub crm_base_url: String,

    /// Bearer token for the CRM API.
    pub crm_token: String,

    // =========================
    // Coordinator configuration
    // =========================
    /// TTL of the per-session exclusive lock.
    ///
    /// All mutating booking work for one session runs inside this lease.
    /// Must comfortably exceed the worst-case CRM round-trip chain of a
    /// single create (read + create + associate + counter + debit).
    pub session_lock_ttl_ms: u64,

    /// TTL of the per-contact exclusive lock guarding credit reads/writes.
    pub contact_lock_ttl_ms: u64,

    /// Width of the idempotency time bucket. Requests with identical
    /// payloads inside one bucket collapse to a single booking.
    pub idempotency_bucket_ms: u64,

    /// Maximum items per CRM batch call (activation, batch updates).
    pub batch_size: usize,

    /// Whether the counter may fall back to a locked fetch-update-set loop
    /// when the atomic increment path fails.
    pub counter_fallback_enabled: bool,

    // =========================
    // Background jobs
    // =========================
    /// Cadence of the scheduled-activation sweep.
    pub activation_tick_ms: u64,

    /// Cadence of the counter reconciliation pass.
    pub reconcile_tick_ms: u64,

    // =========================
    // Cache TTLs
    // =========================
    /// Per-contact booking list when the filter includes upcoming bookings.
    /// Short: these lists change on every create/cancel.
    pub cache_ttl_upcoming_ms: u64,

    /// Per-contact booking list for historical filters.
    pub cache_ttl_default_ms: u64,

    /// Session listings, aggregates, and session detail.
    pub cache_ttl_listing_ms: u64,

    // =========================
    // Projection sync
    // =========================
    /// Capacity of the fire-and-forget projection queue.
    ///
    /// Acts as backpressure: when full, new projection jobs are dropped
    /// (and counted) rather than spawning unbounded tasks. Reconciliation
    /// repairs whatever was dropped.
    pub sync_queue_capacity: usize,

    /// Number of projection workers draining the queue.
    pub sync_workers: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://mocks_dev.db".to_string());
        let crm_base_url = std::env::var("CRM_BASE_URL")
            .unwrap_or_else(|_| "https://api.hubapi.com".to_string());
        let crm_token = std::env::var("CRM_TOKEN").unwrap_or_default();

        Self {
            database_url,
            crm_base_url,
            crm_token,

            session_lock_ttl_ms: env_u64("SESSION_LOCK_TTL_MS", 15_000),
            contact_lock_ttl_ms: env_u64("CONTACT_LOCK_TTL_MS", 10_000),
            idempotency_bucket_ms: env_u64("IDEMPOTENCY_BUCKET_MS", 300_000),
            batch_size: env_u64("BATCH_SIZE", 100) as usize,
            counter_fallback_enabled: std::env::var("COUNTER_FALLBACK_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(true),

            activation_tick_ms: env_u64("ACTIVATION_TICK_MS", 60_000),
            reconcile_tick_ms: env_u64("RECONCILE_TICK_MS", 300_000),

            cache_ttl_upcoming_ms: env_u64("CACHE_TTL_UPCOMING_MS", 30_000),
            cache_ttl_default_ms: env_u64("CACHE_TTL_DEFAULT_MS", 180_000),
            cache_ttl_listing_ms: env_u64("CACHE_TTL_LISTING_MS", 120_000),

            sync_queue_capacity: env_u64("SYNC_QUEUE_CAPACITY", 256) as usize,
            sync_workers: env_u64("SYNC_WORKERS", 4) as usize,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.session_lock_ttl_ms, 15_000);
        assert_eq!(cfg.contact_lock_ttl_ms, 10_000);
        assert_eq!(cfg.idempotency_bucket_ms, 300_000);
        assert_eq!(cfg.batch_size, 100);
        assert!(cfg.counter_fallback_enabled);
        assert_eq!(cfg.activation_tick_ms, 60_000);
        assert_eq!(cfg.cache_ttl_upcoming_ms, 30_000);
        assert_eq!(cfg.cache_ttl_default_ms, 180_000);
    }
}
