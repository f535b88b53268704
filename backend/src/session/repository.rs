use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::page::Page;
use crate::session::model::{Session, SessionFilters};

/// Fast-store projection of CRM sessions.
/// Implementations own persistence and row mapping only; sequencing against
/// the CRM lives in the session store and the coordinator.
#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Insert or refresh a projected session, keyed by its CRM id.
    async fn upsert(&self, session: &Session) -> anyhow::Result<()>;

    async fn fetch_by_hubspot_id(&self, hubspot_id: &str) -> anyhow::Result<Option<Session>>;

    async fn fetch_by_uuid(&self, uuid: &Uuid) -> anyhow::Result<Option<Session>>;

    async fn search(&self, filters: &SessionFilters) -> anyhow::Result<Page<Session>>;

    /// Atomically add `delta` to `total_bookings`, clamped at zero.
    /// Returns the post-value, or `None` when the session is not projected.
    async fn adjust_total(&self, hubspot_id: &str, delta: i64) -> anyhow::Result<Option<i64>>;

    /// Overwrite `total_bookings`; reconciliation only.
    async fn set_total(&self, hubspot_id: &str, value: i64) -> anyhow::Result<()>;

    async fn delete(&self, hubspot_id: &str) -> anyhow::Result<()>;

    /// Scheduled sessions whose activation datetime has elapsed.
    async fn fetch_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Session>>;

    /// Sessions written since `since`; feeds the reconciliation pass.
    async fn recently_updated(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Session>>;
}
