use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::page::Page;
use crate::session::model::{
    ActivationState, MockType, Session, SessionFilters, parse_count, parse_date, parse_datetime,
    parse_time,
};
use crate::session::repository::SessionRepository;

const SESSION_COLUMNS: &str = "uuid, hubspot_id, mock_type, exam_date, start_time, end_time, \
     location, capacity, total_bookings, is_active, scheduled_activation_datetime, \
     created_at, updated_at";

/// SQLx-backed implementation of SessionRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxSessionRepository {
    pool: AnyPool,
}

impl SqlxSessionRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn upsert(&self, session: &Session) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
INSERT INTO sessions (
  uuid, hubspot_id, mock_type, exam_date, start_time, end_time,
  location, capacity, total_bookings, is_active, scheduled_activation_datetime,
  created_at, updated_at, synced_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(hubspot_id) DO UPDATE SET
  mock_type = excluded.mock_type,
  exam_date = excluded.exam_date,
  start_time = excluded.start_time,
  end_time = excluded.end_time,
  location = excluded.location,
  capacity = excluded.capacity,
  total_bookings = excluded.total_bookings,
  is_active = excluded.is_active,
  scheduled_activation_datetime = excluded.scheduled_activation_datetime,
  updated_at = excluded.updated_at,
  synced_at = excluded.synced_at;
"#,
        )
        .bind(session.uuid.to_string())
        .bind(&session.hubspot_id)
        .bind(session.mock_type.as_str())
        .bind(session.exam_date.format("%Y-%m-%d").to_string())
        .bind(session.start_time.format("%H:%M").to_string())
        .bind(session.end_time.format("%H:%M").to_string())
        .bind(&session.location)
        .bind(i64::from(session.capacity))
        .bind(i64::from(session.total_bookings))
        .bind(session.activation.as_str())
        .bind(session.scheduled_activation_at.map(|at| at.to_rfc3339()))
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("upsert session projection")?;

        Ok(())
    }

    async fn fetch_by_hubspot_id(&self, hubspot_id: &str) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE hubspot_id = ?;"
        ))
        .bind(hubspot_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_session(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_by_uuid(&self, uuid: &Uuid) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE uuid = ?;"
        ))
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_session(&r)?)),
            None => Ok(None),
        }
    }

    async fn search(&self, filters: &SessionFilters) -> anyhow::Result<Page<Session>> {
        let filters = filters.clone().normalized();

        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(loc) = &filters.filter_location {
            clauses.push("location = ?");
            binds.push(loc.clone());
        }
        if let Some(mt) = filters.filter_mock_type {
            clauses.push("mock_type = ?");
            binds.push(mt.as_str().to_string());
        }
        if let Some(state) = filters.filter_status.as_activation() {
            clauses.push("is_active = ?");
            binds.push(state.as_str().to_string());
        }
        if let Some(from) = filters.filter_date_from {
            clauses.push("exam_date >= ?");
            binds.push(from.format("%Y-%m-%d").to_string());
        }
        if let Some(to) = filters.filter_date_to {
            clauses.push("exam_date <= ?");
            binds.push(to.format("%Y-%m-%d").to_string());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) AS n FROM sessions {where_sql};");
        let mut count_query = sqlx::query(&count_sql);
        for b in &binds {
            count_query = count_query.bind(b.as_str());
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("n");

        // sort column and order come from enums, never from caller strings
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions {where_sql} \
             ORDER BY {} {} LIMIT ? OFFSET ?;",
            filters.sort_by.column(),
            filters.sort_order.keyword()
        );

        let offset = i64::from(filters.page - 1) * i64::from(filters.limit);
        let mut query = sqlx::query(&sql);
        for b in &binds {
            query = query.bind(b.as_str());
        }
        let rows = query
            .bind(i64::from(filters.limit))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::new();
        for r in rows {
            match row_to_session(&r) {
                Ok(s) => items.push(s),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the page
                    tracing::warn!(error = %e, "skipping malformed session row");
                }
            }
        }

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: filters.page,
            limit: filters.limit,
        })
    }

    async fn adjust_total(&self, hubspot_id: &str, delta: i64) -> anyhow::Result<Option<i64>> {
        let now = Utc::now().to_rfc3339();

        let res = sqlx::query(
            r#"
UPDATE sessions
SET total_bookings = CASE
      WHEN total_bookings + ? < 0 THEN 0
      ELSE total_bookings + ?
    END,
    updated_at = ?,
    synced_at = ?
WHERE hubspot_id = ?;
"#,
        )
        .bind(delta)
        .bind(delta)
        .bind(&now)
        .bind(&now)
        .bind(hubspot_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT total_bookings FROM sessions WHERE hubspot_id = ?;")
            .bind(hubspot_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(row.get::<i64, _>("total_bookings")))
    }

    async fn set_total(&self, hubspot_id: &str, value: i64) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE sessions SET total_bookings = ?, updated_at = ?, synced_at = ? WHERE hubspot_id = ?;",
        )
        .bind(value.max(0))
        .bind(&now)
        .bind(&now)
        .bind(hubspot_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, hubspot_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE hubspot_id = ?;")
            .bind(hubspot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE is_active = 'scheduled' \
               AND scheduled_activation_datetime IS NOT NULL \
               AND scheduled_activation_datetime <= ? \
             ORDER BY scheduled_activation_datetime ASC \
             LIMIT ?;"
        ))
        .bind(now.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn recently_updated(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE updated_at >= ? ORDER BY updated_at DESC LIMIT ?;"
        ))
        .bind(since.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }
}

/* =========================
Row mapping
========================= */

fn row_to_session(r: &sqlx::any::AnyRow) -> anyhow::Result<Session> {
    let uuid_str: String = r.get("uuid");
    let uuid = Uuid::parse_str(&uuid_str).context("invalid session uuid")?;

    let mock_type_str: String = r.get("mock_type");
    let mock_type = MockType::parse(&mock_type_str)
        .with_context(|| format!("unknown mock_type: {mock_type_str}"))?;

    let activation_str: String = r.get("is_active");
    let activation = ActivationState::parse(&activation_str)
        .with_context(|| format!("unknown is_active: {activation_str}"))?;

    Ok(Session {
        uuid,
        hubspot_id: r.get::<String, _>("hubspot_id"),
        mock_type,
        exam_date: parse_date(&r.get::<String, _>("exam_date"))?,
        start_time: parse_time(&r.get::<String, _>("start_time"))?,
        end_time: parse_time(&r.get::<String, _>("end_time"))?,
        location: r.get::<String, _>("location"),
        capacity: parse_count(&r.get::<i64, _>("capacity").to_string())?,
        total_bookings: parse_count(&r.get::<i64, _>("total_bookings").to_string())?,
        activation,
        scheduled_activation_at: r
            .get::<Option<String>, _>("scheduled_activation_datetime")
            .as_deref()
            .map(parse_datetime)
            .transpose()?,
        created_at: parse_datetime(&r.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&r.get::<String, _>("updated_at"))?,
        extra: Default::default(),
    })
}
