use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Sessions projection
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS sessions (
  uuid TEXT PRIMARY KEY,
  hubspot_id TEXT NOT NULL UNIQUE,

  mock_type TEXT NOT NULL,
  exam_date TEXT NOT NULL,
  start_time TEXT NOT NULL,
  end_time TEXT NOT NULL,
  location TEXT NOT NULL,

  capacity BIGINT NOT NULL,
  total_bookings BIGINT NOT NULL,

  is_active TEXT NOT NULL,
  scheduled_activation_datetime TEXT,

  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  synced_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Bookings projection (uuid-keyed; hubspot_id may lag behind sync)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS bookings (
  uuid TEXT PRIMARY KEY,
  hubspot_id TEXT UNIQUE,

  booking_id TEXT NOT NULL,
  associated_session TEXT NOT NULL,
  associated_contact TEXT NOT NULL,

  student_id TEXT NOT NULL,
  name TEXT NOT NULL,
  email TEXT NOT NULL,

  mock_type TEXT NOT NULL,
  exam_date TEXT NOT NULL,
  start_time TEXT NOT NULL,
  end_time TEXT NOT NULL,

  is_active TEXT NOT NULL,
  attendance TEXT,
  attending_location TEXT,
  dominant_hand TEXT,
  token_used TEXT,
  idempotency_key TEXT NOT NULL,

  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  synced_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Contacts projection
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS contacts (
  uuid TEXT PRIMARY KEY,
  hubspot_id TEXT NOT NULL UNIQUE,

  student_id TEXT NOT NULL UNIQUE,
  email TEXT NOT NULL,
  first_name TEXT NOT NULL,
  last_name TEXT NOT NULL,

  sj_credits BIGINT NOT NULL,
  cs_credits BIGINT NOT NULL,
  sjmini_credits BIGINT NOT NULL,
  mock_discussion_credits BIGINT NOT NULL,
  shared_credits BIGINT NOT NULL,

  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  synced_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_sessions_activation
           ON sessions(is_active, scheduled_activation_datetime);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_bookings_contact ON bookings(associated_contact);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_bookings_session_status
           ON bookings(associated_session, is_active);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_bookings_booking_id ON bookings(booking_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_bookings_idem ON bookings(idempotency_key);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
