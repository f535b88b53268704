//! Wiring: builds the full component graph over a database pool, a CRM
//! client, and a KV service. Hosts embed [`Engine`] and mount the
//! coordinator behind their transport; the binary additionally starts the
//! background jobs.

use std::sync::Arc;
use std::time::Duration;

use sqlx::AnyPool;

use crate::activator::ScheduledActivator;
use crate::booking::coordinator::BookingCoordinator;
use crate::booking::repository::BookingRepository;
use crate::booking::repository_sqlx::SqlxBookingRepository;
use crate::cache::{CacheTtls, ReadCache};
use crate::config::AppConfig;
use crate::contact::repository::ContactRepository;
use crate::contact::repository_sqlx::SqlxContactRepository;
use crate::counter::{BookingCounter, CounterReconciler};
use crate::crm::CrmClient;
use crate::kv::KvStore;
use crate::ledger::CreditLedger;
use crate::lock::LockManager;
use crate::metrics::counters::Counters;
use crate::resolver::Resolver;
use crate::session::repository::SessionRepository;
use crate::session::repository_sqlx::SqlxSessionRepository;
use crate::session::store::SessionStore;
use crate::sync::ProjectionPool;

pub struct Engine {
    pub coordinator: Arc<BookingCoordinator>,
    pub sessions: Arc<SessionStore>,
    pub activator: Arc<ScheduledActivator>,
    pub reconciler: Arc<CounterReconciler>,
    pub resolver: Resolver,
    pub ledger: Arc<CreditLedger>,
    pub counters: Counters,
}

impl Engine {
    /// Assemble every component. Must run inside a tokio runtime (the
    /// projection workers are spawned here).
    pub fn build(
        cfg: &AppConfig,
        crm: Arc<dyn CrmClient>,
        kv: Arc<dyn KvStore>,
        pool: AnyPool,
    ) -> Self {
        let counters = Counters::default();

        let session_repo: Arc<dyn SessionRepository> =
            Arc::new(SqlxSessionRepository::new(pool.clone()));
        let booking_repo: Arc<dyn BookingRepository> =
            Arc::new(SqlxBookingRepository::new(pool.clone()));
        let contact_repo: Arc<dyn ContactRepository> =
            Arc::new(SqlxContactRepository::new(pool.clone()));

        let sync = ProjectionPool::new(
            Arc::clone(&session_repo),
            Arc::clone(&booking_repo),
            Arc::clone(&contact_repo),
            counters.clone(),
        )
        .spawn(cfg.sync_workers, cfg.sync_queue_capacity);

        let locks = LockManager::new(
            Arc::clone(&kv),
            cfg.session_lock_ttl_ms,
            cfg.contact_lock_ttl_ms,
        );
        let cache = ReadCache::new(
            kv,
            CacheTtls::from_ms(
                cfg.cache_ttl_upcoming_ms,
                cfg.cache_ttl_default_ms,
                cfg.cache_ttl_listing_ms,
            ),
        );

        let resolver = Resolver::new(
            Arc::clone(&crm),
            Arc::clone(&contact_repo),
            Arc::clone(&session_repo),
            Arc::clone(&booking_repo),
            sync.clone(),
        );

        let ledger = Arc::new(CreditLedger::new(
            Arc::clone(&crm),
            Arc::clone(&contact_repo),
            locks.clone(),
            sync,
        ));

        let counter = Arc::new(BookingCounter::new(
            Arc::clone(&session_repo),
            cfg.counter_fallback_enabled,
            counters.clone(),
        ));

        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&crm),
            Arc::clone(&session_repo),
            Arc::clone(&booking_repo),
            resolver.clone(),
            cache.clone(),
            cfg.batch_size,
        ));

        let activator = Arc::new(ScheduledActivator::new(
            Arc::clone(&sessions),
            counters.clone(),
        ));

        let reconciler = Arc::new(CounterReconciler::new(
            Arc::clone(&crm),
            Arc::clone(&session_repo),
            Arc::clone(&booking_repo),
            cfg.batch_size,
            counters.clone(),
        ));

        let coordinator = Arc::new(BookingCoordinator::new(
            crm,
            booking_repo,
            Arc::clone(&sessions),
            resolver.clone(),
            Arc::clone(&ledger),
            counter,
            locks,
            cache,
            cfg.idempotency_bucket_ms,
            counters.clone(),
        ));

        Self {
            coordinator,
            sessions,
            activator,
            reconciler,
            resolver,
            ledger,
            counters,
        }
    }

    /// Start the activation and reconciliation loops.
    pub fn start_background_jobs(&self, cfg: &AppConfig) {
        Arc::clone(&self.activator).spawn(Duration::from_millis(cfg.activation_tick_ms));
        Arc::clone(&self.reconciler).spawn(
            Duration::from_millis(cfg.reconcile_tick_ms),
            chrono::Duration::hours(24),
        );
    }
}
