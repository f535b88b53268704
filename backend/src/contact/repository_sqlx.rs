use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::contact::model::{Contact, CreditBalance, CreditField};
use crate::contact::repository::ContactRepository;
use crate::session::model::{parse_count, parse_datetime};

const CONTACT_COLUMNS: &str = "uuid, hubspot_id, student_id, email, first_name, last_name, \
     sj_credits, cs_credits, sjmini_credits, mock_discussion_credits, shared_credits, \
     created_at, updated_at";

pub struct SqlxContactRepository {
    pool: AnyPool,
}

impl SqlxContactRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for SqlxContactRepository {
    async fn upsert(&self, contact: &Contact) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
INSERT INTO contacts (
  uuid, hubspot_id, student_id, email, first_name, last_name,
  sj_credits, cs_credits, sjmini_credits, mock_discussion_credits, shared_credits,
  created_at, updated_at, synced_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(hubspot_id) DO UPDATE SET
  student_id = excluded.student_id,
  email = excluded.email,
  first_name = excluded.first_name,
  last_name = excluded.last_name,
  sj_credits = excluded.sj_credits,
  cs_credits = excluded.cs_credits,
  sjmini_credits = excluded.sjmini_credits,
  mock_discussion_credits = excluded.mock_discussion_credits,
  shared_credits = excluded.shared_credits,
  updated_at = excluded.updated_at,
  synced_at = excluded.synced_at;
"#,
        )
        .bind(contact.uuid.to_string())
        .bind(&contact.hubspot_id)
        .bind(&contact.student_id)
        .bind(&contact.email)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(i64::from(contact.credits.sj))
        .bind(i64::from(contact.credits.cs))
        .bind(i64::from(contact.credits.sjmini))
        .bind(i64::from(contact.credits.mock_discussion))
        .bind(i64::from(contact.credits.shared))
        .bind(contact.created_at.to_rfc3339())
        .bind(contact.updated_at.to_rfc3339())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("upsert contact projection")?;

        Ok(())
    }

    async fn fetch_by_hubspot_id(&self, hubspot_id: &str) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE hubspot_id = ?;"
        ))
        .bind(hubspot_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_contact(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_by_uuid(&self, uuid: &Uuid) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE uuid = ?;"
        ))
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_contact(&r)?)),
            None => Ok(None),
        }
    }

    async fn set_credit(
        &self,
        hubspot_id: &str,
        field: CreditField,
        value: u32,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();

        // column name comes from the CreditField enum, never from input
        let sql = format!(
            "UPDATE contacts SET {} = ?, updated_at = ?, synced_at = ? WHERE hubspot_id = ?;",
            field.crm_property()
        );

        sqlx::query(&sql)
            .bind(i64::from(value))
            .bind(&now)
            .bind(&now)
            .bind(hubspot_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn row_to_contact(r: &sqlx::any::AnyRow) -> anyhow::Result<Contact> {
    let uuid_str: String = r.get("uuid");
    let uuid = Uuid::parse_str(&uuid_str).context("invalid contact uuid")?;

    let count = |col: &str| -> anyhow::Result<u32> {
        parse_count(&r.get::<i64, _>(col).to_string())
    };

    Ok(Contact {
        uuid,
        hubspot_id: r.get::<String, _>("hubspot_id"),
        student_id: r.get::<String, _>("student_id"),
        email: r.get::<String, _>("email"),
        first_name: r.get::<String, _>("first_name"),
        last_name: r.get::<String, _>("last_name"),
        credits: CreditBalance {
            sj: count("sj_credits")?,
            cs: count("cs_credits")?,
            sjmini: count("sjmini_credits")?,
            mock_discussion: count("mock_discussion_credits")?,
            shared: count("shared_credits")?,
        },
        created_at: parse_datetime(&r.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&r.get::<String, _>("updated_at"))?,
        extra: Default::default(),
    })
}
