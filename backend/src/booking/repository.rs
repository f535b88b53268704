use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::booking::model::{Booking, BookingFilter, BookingStatus};
use crate::page::Page;

/// Fast-store bookings table, keyed on the local uuid.
#[async_trait]
pub trait BookingRepository: Send + Sync + 'static {
    async fn upsert(&self, booking: &Booking) -> anyhow::Result<()>;

    async fn fetch_by_uuid(&self, uuid: &Uuid) -> anyhow::Result<Option<Booking>>;

    async fn fetch_by_hubspot_id(&self, hubspot_id: &str) -> anyhow::Result<Option<Booking>>;

    async fn fetch_by_idempotency_key(&self, key: &str) -> anyhow::Result<Option<Booking>>;

    /// The at-most-one Active booking carrying this derived booking id.
    /// Terminal homonyms are ignored.
    async fn fetch_active_by_booking_id(&self, booking_id: &str)
    -> anyhow::Result<Option<Booking>>;

    async fn list_by_contact(
        &self,
        contact_hubspot_id: &str,
        filter: BookingFilter,
        today: NaiveDate,
        page: u32,
        limit: u32,
    ) -> anyhow::Result<Page<Booking>>;

    async fn count_active_for_session(&self, session_hubspot_id: &str) -> anyhow::Result<i64>;

    async fn set_status(
        &self,
        uuid: &Uuid,
        status: BookingStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Move a booking to another session, refreshing the denormalized
    /// session columns in the same statement.
    async fn relink_session(
        &self,
        uuid: &Uuid,
        session_hubspot_id: &str,
        exam_date: NaiveDate,
        start_time: chrono::NaiveTime,
        end_time: chrono::NaiveTime,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn delete(&self, uuid: &Uuid) -> anyhow::Result<()>;
}
