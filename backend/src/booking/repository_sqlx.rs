use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::booking::model::{Booking, BookingFilter, BookingStatus};
use crate::booking::repository::BookingRepository;
use crate::contact::model::CreditField;
use crate::page::Page;
use crate::session::model::{MockType, parse_date, parse_datetime, parse_time};

const BOOKING_COLUMNS: &str = "uuid, hubspot_id, booking_id, associated_session, \
     associated_contact, student_id, name, email, mock_type, exam_date, start_time, end_time, \
     is_active, attendance, attending_location, dominant_hand, token_used, idempotency_key, \
     created_at, updated_at";

pub struct SqlxBookingRepository {
    pool: AnyPool,
}

impl SqlxBookingRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        bind: &str,
    ) -> anyhow::Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE {clause};"
        ))
        .bind(bind)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_booking(&r)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BookingRepository for SqlxBookingRepository {
    async fn upsert(&self, booking: &Booking) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
INSERT INTO bookings (
  uuid, hubspot_id, booking_id, associated_session, associated_contact,
  student_id, name, email, mock_type, exam_date, start_time, end_time,
  is_active, attendance, attending_location, dominant_hand, token_used,
  idempotency_key, created_at, updated_at, synced_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(uuid) DO UPDATE SET
  hubspot_id = excluded.hubspot_id,
  booking_id = excluded.booking_id,
  associated_session = excluded.associated_session,
  associated_contact = excluded.associated_contact,
  student_id = excluded.student_id,
  name = excluded.name,
  email = excluded.email,
  mock_type = excluded.mock_type,
  exam_date = excluded.exam_date,
  start_time = excluded.start_time,
  end_time = excluded.end_time,
  is_active = excluded.is_active,
  attendance = excluded.attendance,
  attending_location = excluded.attending_location,
  dominant_hand = excluded.dominant_hand,
  token_used = excluded.token_used,
  idempotency_key = excluded.idempotency_key,
  updated_at = excluded.updated_at,
  synced_at = excluded.synced_at;
"#,
        )
        .bind(booking.uuid.to_string())
        .bind(booking.hubspot_id.as_deref())
        .bind(&booking.booking_id)
        .bind(&booking.associated_session)
        .bind(&booking.associated_contact)
        .bind(&booking.student_id)
        .bind(&booking.name)
        .bind(&booking.email)
        .bind(booking.mock_type.as_str())
        .bind(booking.exam_date.format("%Y-%m-%d").to_string())
        .bind(booking.start_time.format("%H:%M").to_string())
        .bind(booking.end_time.format("%H:%M").to_string())
        .bind(booking.status.as_str())
        .bind(booking.attendance.as_deref())
        .bind(booking.attending_location.as_deref())
        .bind(booking.dominant_hand.map(|h| h.to_string()))
        .bind(booking.token_used.map(|f| f.as_str()))
        .bind(&booking.idempotency_key)
        .bind(booking.created_at.to_rfc3339())
        .bind(booking.updated_at.to_rfc3339())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("upsert booking projection")?;

        Ok(())
    }

    async fn fetch_by_uuid(&self, uuid: &Uuid) -> anyhow::Result<Option<Booking>> {
        self.fetch_one_where("uuid = ?", &uuid.to_string()).await
    }

    async fn fetch_by_hubspot_id(&self, hubspot_id: &str) -> anyhow::Result<Option<Booking>> {
        self.fetch_one_where("hubspot_id = ?", hubspot_id).await
    }

    async fn fetch_by_idempotency_key(&self, key: &str) -> anyhow::Result<Option<Booking>> {
        self.fetch_one_where("idempotency_key = ?", key).await
    }

    async fn fetch_active_by_booking_id(
        &self,
        booking_id: &str,
    ) -> anyhow::Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE booking_id = ? AND is_active = 'Active';"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_booking(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_by_contact(
        &self,
        contact_hubspot_id: &str,
        filter: BookingFilter,
        today: NaiveDate,
        page: u32,
        limit: u32,
    ) -> anyhow::Result<Page<Booking>> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let today = today.format("%Y-%m-%d").to_string();

        let (date_clause, order) = match filter {
            BookingFilter::All => ("", "DESC"),
            BookingFilter::Upcoming => ("AND exam_date >= ?", "ASC"),
            BookingFilter::Past => ("AND exam_date < ?", "DESC"),
        };

        let count_sql = format!(
            "SELECT COUNT(*) AS n FROM bookings WHERE associated_contact = ? {date_clause};"
        );
        let mut count_query = sqlx::query(&count_sql).bind(contact_hubspot_id);
        if !date_clause.is_empty() {
            count_query = count_query.bind(today.as_str());
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("n");

        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE associated_contact = ? {date_clause} \
             ORDER BY exam_date {order}, start_time {order} LIMIT ? OFFSET ?;"
        );
        let mut query = sqlx::query(&sql).bind(contact_hubspot_id);
        if !date_clause.is_empty() {
            query = query.bind(today.as_str());
        }
        let rows = query
            .bind(i64::from(limit))
            .bind(i64::from(page - 1) * i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::new();
        for r in rows {
            match row_to_booking(&r) {
                Ok(b) => items.push(b),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed booking row");
                }
            }
        }

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page,
            limit,
        })
    }

    async fn count_active_for_session(&self, session_hubspot_id: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM bookings \
             WHERE associated_session = ? AND is_active = 'Active';",
        )
        .bind(session_hubspot_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("n"))
    }

    async fn set_status(
        &self,
        uuid: &Uuid,
        status: BookingStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let at = at.to_rfc3339();

        sqlx::query(
            "UPDATE bookings SET is_active = ?, updated_at = ?, synced_at = ? WHERE uuid = ?;",
        )
        .bind(status.as_str())
        .bind(&at)
        .bind(&at)
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn relink_session(
        &self,
        uuid: &Uuid,
        session_hubspot_id: &str,
        exam_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let at = at.to_rfc3339();

        sqlx::query(
            r#"
UPDATE bookings
SET associated_session = ?,
    exam_date = ?,
    start_time = ?,
    end_time = ?,
    updated_at = ?,
    synced_at = ?
WHERE uuid = ?;
"#,
        )
        .bind(session_hubspot_id)
        .bind(exam_date.format("%Y-%m-%d").to_string())
        .bind(start_time.format("%H:%M").to_string())
        .bind(end_time.format("%H:%M").to_string())
        .bind(&at)
        .bind(&at)
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, uuid: &Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM bookings WHERE uuid = ?;")
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/* =========================
Row mapping
========================= */

fn row_to_booking(r: &sqlx::any::AnyRow) -> anyhow::Result<Booking> {
    let uuid_str: String = r.get("uuid");
    let uuid = Uuid::parse_str(&uuid_str).context("invalid booking uuid")?;

    let status_str: String = r.get("is_active");
    let status = BookingStatus::parse(&status_str)
        .with_context(|| format!("unknown booking status: {status_str}"))?;

    let mock_type_str: String = r.get("mock_type");
    let mock_type = MockType::parse(&mock_type_str)
        .with_context(|| format!("unknown mock_type: {mock_type_str}"))?;

    Ok(Booking {
        uuid,
        hubspot_id: r.get::<Option<String>, _>("hubspot_id"),
        booking_id: r.get::<String, _>("booking_id"),
        associated_session: r.get::<String, _>("associated_session"),
        associated_contact: r.get::<String, _>("associated_contact"),
        student_id: r.get::<String, _>("student_id"),
        name: r.get::<String, _>("name"),
        email: r.get::<String, _>("email"),
        mock_type,
        exam_date: parse_date(&r.get::<String, _>("exam_date"))?,
        start_time: parse_time(&r.get::<String, _>("start_time"))?,
        end_time: parse_time(&r.get::<String, _>("end_time"))?,
        status,
        attendance: r.get::<Option<String>, _>("attendance"),
        attending_location: r.get::<Option<String>, _>("attending_location"),
        dominant_hand: r
            .get::<Option<String>, _>("dominant_hand")
            .map(|v| v == "true"),
        token_used: r
            .get::<Option<String>, _>("token_used")
            .as_deref()
            .and_then(CreditField::parse),
        idempotency_key: r.get::<String, _>("idempotency_key"),
        created_at: parse_datetime(&r.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&r.get::<String, _>("updated_at"))?,
        extra: Default::default(),
    })
}
