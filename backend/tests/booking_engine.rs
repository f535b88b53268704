use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tokio::task::JoinSet;
use uuid::Uuid;

use backend::booking::model::{
    Actor, BookingFilter, BookingStatus, CancelBooking, CreateBooking, RebookBooking,
};
use backend::config::AppConfig;
use backend::contact::model::CreditField;
use backend::crm::memory::MemoryCrm;
use backend::crm::ObjectType;
use backend::db::schema;
use backend::engine::Engine;
use backend::kv::memory::MemoryKv;
use backend::session::model::{ActivationState, MockType, Session};
use backend::session::repository::SessionRepository;
use backend::session::repository_sqlx::SqlxSessionRepository;

/* =========================
Harness
========================= */

struct Harness {
    engine: Engine,
    crm: Arc<MemoryCrm>,
    pool: AnyPool,
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: String::new(),
        crm_base_url: String::new(),
        crm_token: String::new(),
        session_lock_ttl_ms: 15_000,
        contact_lock_ttl_ms: 10_000,
        idempotency_bucket_ms: 300_000,
        batch_size: 100,
        counter_fallback_enabled: true,
        activation_tick_ms: 60_000,
        reconcile_tick_ms: 300_000,
        cache_ttl_upcoming_ms: 30_000,
        cache_ttl_default_ms: 180_000,
        cache_ttl_listing_ms: 120_000,
        sync_queue_capacity: 256,
        sync_workers: 2,
    }
}

async fn setup() -> Harness {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");
    schema::migrate(&pool).await.expect("migrate");

    let crm = Arc::new(MemoryCrm::new());
    let kv = Arc::new(MemoryKv::new());
    let engine = Engine::build(&test_config(), crm.clone(), kv, pool.clone());

    Harness { engine, crm, pool }
}

fn seed_contact(h: &Harness, id: &str, credits: [(CreditField, u32); 5]) {
    let mut props = HashMap::from([
        ("student_id".to_string(), format!("ST{id}")),
        ("email".to_string(), format!("student{id}@example.com")),
        ("firstname".to_string(), "Student".to_string()),
        ("lastname".to_string(), id.to_string()),
    ]);
    for (field, value) in credits {
        props.insert(field.crm_property().to_string(), value.to_string());
    }
    h.crm.seed(ObjectType::Contact, id, props);
}

fn credits(sj: u32, cs: u32, sjmini: u32, mock_discussion: u32, shared: u32) -> [(CreditField, u32); 5] {
    [
        (CreditField::Sj, sj),
        (CreditField::Cs, cs),
        (CreditField::Sjmini, sjmini),
        (CreditField::MockDiscussion, mock_discussion),
        (CreditField::Shared, shared),
    ]
}

fn future_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(30)
}

async fn seed_session(
    h: &Harness,
    id: &str,
    mock_type: MockType,
    capacity: u32,
    activation: ActivationState,
    exam_date: NaiveDate,
) -> Session {
    let session = Session {
        uuid: Uuid::new_v4(),
        hubspot_id: id.to_string(),
        mock_type,
        exam_date,
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        location: "London".to_string(),
        capacity,
        total_bookings: 0,
        activation,
        scheduled_activation_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        extra: HashMap::new(),
    };

    h.crm
        .seed(ObjectType::MockExam, id, session.to_crm_properties());
    SqlxSessionRepository::new(h.pool.clone())
        .upsert(&session)
        .await
        .unwrap();
    session
}

fn create_cmd(contact_id: &str, session_id: &str, name: &str, mock_type: MockType) -> CreateBooking {
    CreateBooking {
        contact_id: contact_id.to_string(),
        session_id: session_id.to_string(),
        student_id: format!("ST{contact_id}"),
        name: name.to_string(),
        email: format!("student{contact_id}@example.com"),
        mock_type,
        exam_date: future_date(),
        dominant_hand: mock_type.requires_dominant_hand().then_some(true),
        attending_location: mock_type
            .requires_attending_location()
            .then(|| "London".to_string()),
        idempotency_key: None,
    }
}

fn cancel_cmd(identifier: String, refund: bool) -> CancelBooking {
    CancelBooking {
        identifier,
        actor: Actor::Student,
        reason: None,
        refund_tokens: refund,
    }
}

async fn total_bookings(h: &Harness, session_id: &str) -> u32 {
    SqlxSessionRepository::new(h.pool.clone())
        .fetch_by_hubspot_id(session_id)
        .await
        .unwrap()
        .unwrap()
        .total_bookings
}

/* =========================
Scenario 1: overbooking resisted
========================= */

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_creates_fill_exactly_one_seat() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 1, ActivationState::Active, future_date())
        .await;

    for i in 0..50 {
        seed_contact(&h, &format!("c{i}"), credits(1, 0, 0, 0, 0));
    }

    let mut set = JoinSet::new();
    for i in 0..50 {
        let coordinator = Arc::clone(&h.engine.coordinator);
        set.spawn(async move {
            coordinator
                .create(create_cmd(&format!("c{i}"), "s1", &format!("Student {i}"), MockType::SituationalJudgment))
                .await
        });
    }

    let mut successes = 0;
    let mut full = 0;
    let mut lock_failed = 0;
    while let Some(res) = set.join_next().await {
        match res.expect("task panicked") {
            Ok(outcome) => {
                assert!(!outcome.idempotent_request);
                successes += 1;
            }
            Err(e) => match e.code() {
                "EXAM_FULL" => full += 1,
                "LOCK_ACQUISITION_FAILED" => lock_failed += 1,
                other => panic!("unexpected error kind: {other}"),
            },
        }
    }

    assert_eq!(successes, 1, "exactly one booking must win the seat");
    assert_eq!(successes + full + lock_failed, 50);
    assert_eq!(total_bookings(&h, "s1").await, 1);
    assert_eq!(
        h.crm.prop(ObjectType::MockExam, "s1", "total_bookings").as_deref(),
        Some("1")
    );
}

/* =========================
Scenario 2: idempotent duplicates
========================= */

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_key_requests_collapse_to_one_booking() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::MockDiscussion, 10, ActivationState::Active, future_date())
        .await;
    seed_contact(&h, "c1", credits(0, 0, 0, 5, 0));

    let key = "idem_0123456789abcdef0123456789abcdef".to_string();

    let mut set = JoinSet::new();
    for _ in 0..5 {
        let coordinator = Arc::clone(&h.engine.coordinator);
        let key = key.clone();
        set.spawn(async move {
            let mut cmd = create_cmd("c1", "s1", "Jane Doe", MockType::MockDiscussion);
            cmd.idempotency_key = Some(key);
            coordinator.create(cmd).await
        });
    }

    let mut outcomes = Vec::new();
    while let Some(res) = set.join_next().await {
        outcomes.push(res.expect("task panicked").expect("create failed"));
    }

    let booking_ids: Vec<&str> = outcomes.iter().map(|o| o.booking.booking_id.as_str()).collect();
    assert!(booking_ids.iter().all(|id| *id == booking_ids[0]));
    assert!(outcomes.iter().all(|o| o.idempotency_key == key));

    let fresh: Vec<_> = outcomes.iter().filter(|o| !o.idempotent_request).collect();
    assert_eq!(fresh.len(), 1, "exactly one outcome performed the create");
    assert_eq!(total_bookings(&h, "s1").await, 1);

    // A later send inside the same bucket also collapses.
    let mut replay = create_cmd("c1", "s1", "Jane Doe", MockType::MockDiscussion);
    replay.idempotency_key = Some(key.clone());
    let replayed = h.engine.coordinator.create(replay).await.unwrap();
    assert!(replayed.idempotent_request);
    assert_eq!(replayed.booking.booking_id, booking_ids[0]);

    // After cancellation the same key books a fresh seat under a new key.
    let cancelled = h
        .engine
        .coordinator
        .cancel(cancel_cmd(outcomes[0].booking.uuid.to_string(), true))
        .await
        .unwrap();
    assert!(!cancelled.already_terminal);

    let mut retry = create_cmd("c1", "s1", "Jane Doe", MockType::MockDiscussion);
    retry.idempotency_key = Some(key.clone());
    let fresh_booking = h.engine.coordinator.create(retry).await.unwrap();
    assert!(!fresh_booking.idempotent_request);
    assert_ne!(fresh_booking.idempotency_key, key);
    assert_ne!(fresh_booking.booking.uuid, outcomes[0].booking.uuid);
    assert_eq!(fresh_booking.booking.status, BookingStatus::Active);
}

/* =========================
Scenario 3: credit fall-through round trip
========================= */

#[tokio::test]
async fn sj_falls_through_to_shared_and_refund_restores_it() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 10, ActivationState::Active, future_date())
        .await;
    seed_contact(&h, "c1", credits(0, 0, 0, 0, 1));

    let outcome = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap();

    assert_eq!(outcome.booking.token_used, Some(CreditField::Shared));
    assert_eq!(outcome.shared_after, 0);
    assert_eq!(
        h.crm.prop(ObjectType::Contact, "c1", "shared_credits").as_deref(),
        Some("0")
    );

    let summary = h
        .engine
        .coordinator
        .credits("c1", MockType::SituationalJudgment)
        .await
        .unwrap();
    assert!(!summary.eligible);

    h.engine
        .coordinator
        .cancel(cancel_cmd(outcome.booking.uuid.to_string(), true))
        .await
        .unwrap();

    assert_eq!(
        h.crm.prop(ObjectType::Contact, "c1", "shared_credits").as_deref(),
        Some("1")
    );
    assert_eq!(total_bookings(&h, "s1").await, 0);

    // The restored shared credit pays for the next SJ booking again.
    let again = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap();
    assert_eq!(again.booking.token_used, Some(CreditField::Shared));
}

/* =========================
Scenario 4: mini-mock never uses shared
========================= */

#[tokio::test]
async fn mini_mock_rejects_when_only_shared_credit_exists() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::MiniMock, 10, ActivationState::Active, future_date()).await;
    seed_contact(&h, "c1", credits(0, 0, 0, 0, 5));

    let err = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::MiniMock))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INSUFFICIENT_CREDITS");
    assert_eq!(
        h.crm.prop(ObjectType::Contact, "c1", "shared_credits").as_deref(),
        Some("5")
    );
    assert_eq!(total_bookings(&h, "s1").await, 0);
}

/* =========================
Scenario 5: cancel survives a refund failure
========================= */

#[tokio::test]
async fn cancel_reports_success_with_warning_when_refund_fails() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::MiniMock, 10, ActivationState::Active, future_date()).await;
    seed_contact(&h, "c1", credits(0, 0, 1, 0, 0));

    let outcome = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::MiniMock))
        .await
        .unwrap();
    assert_eq!(
        h.crm.prop(ObjectType::Contact, "c1", "sjmini_credits").as_deref(),
        Some("0")
    );

    // Only the contact (credit) write path fails; booking updates succeed.
    h.crm.fail_on_type("update", ObjectType::Contact);

    let cancelled = h
        .engine
        .coordinator
        .cancel(cancel_cmd(outcome.booking.uuid.to_string(), true))
        .await
        .unwrap();

    assert!(!cancelled.already_terminal);
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert!(
        cancelled
            .warnings
            .iter()
            .any(|w| w.code == "CREDIT_REFUND_FAILED"),
        "refund failure must surface as a warning"
    );
    assert_eq!(total_bookings(&h, "s1").await, 0);
    // credits stay un-refunded until an admin reconciles
    assert_eq!(
        h.crm.prop(ObjectType::Contact, "c1", "sjmini_credits").as_deref(),
        Some("0")
    );

    h.crm.clear_failures();

    // Cancelling again is an idempotent no-op.
    let again = h
        .engine
        .coordinator
        .cancel(cancel_cmd(outcome.booking.uuid.to_string(), true))
        .await
        .unwrap();
    assert!(again.already_terminal);
    assert_eq!(total_bookings(&h, "s1").await, 0);
}

/* =========================
Scenario 6: scheduled activation
========================= */

#[tokio::test]
async fn due_scheduled_sessions_flip_active_on_sweep() {
    let h = setup().await;

    let repo = SqlxSessionRepository::new(h.pool.clone());
    let mut session =
        seed_session(&h, "s1", MockType::SituationalJudgment, 10, ActivationState::Scheduled, future_date())
            .await;
    session.scheduled_activation_at = Some(Utc::now() - Duration::seconds(5));
    h.crm
        .seed(ObjectType::MockExam, "s1", session.to_crm_properties());
    repo.upsert(&session).await.unwrap();

    let report = h.engine.activator.run_once().await.unwrap();
    assert_eq!(report.activated, 1);
    assert_eq!(report.failed, 0);

    let after = repo.fetch_by_hubspot_id("s1").await.unwrap().unwrap();
    assert_eq!(after.activation, ActivationState::Active);
    assert_eq!(after.scheduled_activation_at, None);
    assert_eq!(
        h.crm.prop(ObjectType::MockExam, "s1", "is_active").as_deref(),
        Some("true")
    );
    assert_eq!(after.total_bookings, 0);

    // The sweep is idempotent across ticks.
    let second = h.engine.activator.run_once().await.unwrap();
    assert_eq!(second.total, 0);
}

/* =========================
Rebook
========================= */

#[tokio::test]
async fn rebook_moves_the_seat_without_touching_credits_or_counters() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 5, ActivationState::Active, future_date())
        .await;
    seed_session(&h, "s2", MockType::SituationalJudgment, 5, ActivationState::Active, future_date())
        .await;
    seed_contact(&h, "c1", credits(2, 0, 0, 0, 0));

    let outcome = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap();
    assert_eq!(total_bookings(&h, "s1").await, 1);
    let crm_booking_id = outcome.booking.hubspot_id.clone().unwrap();

    let moved = h
        .engine
        .coordinator
        .rebook(RebookBooking {
            identifier: outcome.booking.uuid.to_string(),
            new_session_id: "s2".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(moved.booking.associated_session, "s2");
    // the seat moves with the booking: neither counter changes
    assert_eq!(total_bookings(&h, "s1").await, 1);
    assert_eq!(total_bookings(&h, "s2").await, 0);
    // no credit movement
    assert_eq!(
        h.crm.prop(ObjectType::Contact, "c1", "sj_credits").as_deref(),
        Some("1")
    );
    // association swapped
    assert!(h.crm.is_associated(ObjectType::Booking, &crm_booking_id, ObjectType::MockExam, "s2"));
    assert!(!h.crm.is_associated(ObjectType::Booking, &crm_booking_id, ObjectType::MockExam, "s1"));
}

#[tokio::test]
async fn rebook_rejects_type_mismatch_past_dates_and_cancelled_bookings() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 5, ActivationState::Active, future_date())
        .await;
    seed_session(&h, "cs", MockType::ClinicalSkills, 5, ActivationState::Active, future_date())
        .await;
    seed_session(
        &h,
        "past",
        MockType::SituationalJudgment,
        5,
        ActivationState::Active,
        Utc::now().date_naive() - Duration::days(1),
    )
    .await;
    seed_contact(&h, "c1", credits(3, 0, 0, 0, 0));

    let outcome = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap();
    let identifier = outcome.booking.uuid.to_string();

    let rebook = |target: &str| RebookBooking {
        identifier: identifier.clone(),
        new_session_id: target.to_string(),
    };

    let err = h.engine.coordinator.rebook(rebook("cs")).await.unwrap_err();
    assert_eq!(err.code(), "EXAM_TYPE_MISMATCH");

    let err = h.engine.coordinator.rebook(rebook("past")).await.unwrap_err();
    assert_eq!(err.code(), "EXAM_PAST_DATE");

    let err = h.engine.coordinator.rebook(rebook("missing")).await.unwrap_err();
    assert_eq!(err.code(), "EXAM_NOT_FOUND");

    h.engine
        .coordinator
        .cancel(cancel_cmd(identifier.clone(), true))
        .await
        .unwrap();
    let err = h.engine.coordinator.rebook(rebook("s1")).await.unwrap_err();
    assert_eq!(err.code(), "BOOKING_CANCELLED");
}

/* =========================
Create guardrails
========================= */

#[tokio::test]
async fn duplicate_active_booking_is_rejected() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 10, ActivationState::Active, future_date())
        .await;
    seed_contact(&h, "c1", credits(5, 0, 0, 0, 0));

    let mut first = create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment);
    first.idempotency_key = Some("idem_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string());
    h.engine.coordinator.create(first).await.unwrap();

    // distinct idempotency key, same person and exam: duplicate by booking_id
    let mut second = create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment);
    second.idempotency_key = Some("idem_bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string());
    let err = h.engine.coordinator.create(second).await.unwrap_err();

    assert_eq!(err.code(), "DUPLICATE_BOOKING");
    assert_eq!(total_bookings(&h, "s1").await, 1);
}

#[tokio::test]
async fn inactive_and_full_sessions_are_rejected() {
    let h = setup().await;
    seed_session(&h, "inactive", MockType::SituationalJudgment, 10, ActivationState::Inactive, future_date())
        .await;
    seed_contact(&h, "c1", credits(5, 0, 0, 0, 0));

    let err = h
        .engine
        .coordinator
        .create(create_cmd("c1", "inactive", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXAM_NOT_ACTIVE");

    let mut full =
        seed_session(&h, "full", MockType::SituationalJudgment, 1, ActivationState::Active, future_date())
            .await;
    full.total_bookings = 1;
    h.crm.seed(ObjectType::MockExam, "full", full.to_crm_properties());
    SqlxSessionRepository::new(h.pool.clone()).upsert(&full).await.unwrap();

    let err = h
        .engine
        .coordinator
        .create(create_cmd("c1", "full", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXAM_FULL");
}

#[tokio::test]
#[tracing_test::traced_test]
async fn failed_debit_rolls_back_the_half_created_booking() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 10, ActivationState::Active, future_date())
        .await;
    seed_contact(&h, "c1", credits(5, 0, 0, 0, 0));

    // Reads succeed, but the credit debit (a contact update) fails, forcing
    // compensation after the CRM booking already exists.
    h.crm.fail_on_type("update", ObjectType::Contact);

    let err = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CRM_UNAVAILABLE");

    h.crm.clear_failures();
    assert!(logs_contain("CLEANUP_PERFORMED"));

    // Compensation removed the booking and took back the counter move.
    assert_eq!(total_bookings(&h, "s1").await, 0);
    let bookings = h
        .engine
        .coordinator
        .list_bookings("c1", BookingFilter::All, 1, 20)
        .await
        .unwrap();
    assert_eq!(bookings.total, 0);
    assert_eq!(
        h.crm.prop(ObjectType::Contact, "c1", "sj_credits").as_deref(),
        Some("5")
    );

    // The seat is still bookable afterwards.
    let retry = h
        .engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap();
    assert_eq!(retry.booking.status, BookingStatus::Active);
    assert_eq!(total_bookings(&h, "s1").await, 1);
}

#[tokio::test]
async fn booking_lists_are_scoped_and_cached_per_contact() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 10, ActivationState::Active, future_date())
        .await;
    seed_contact(&h, "c1", credits(5, 0, 0, 0, 0));
    seed_contact(&h, "c2", credits(5, 0, 0, 0, 0));

    h.engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap();

    let mine = h
        .engine
        .coordinator
        .list_bookings("c1", BookingFilter::Upcoming, 1, 20)
        .await
        .unwrap();
    assert_eq!(mine.total, 1);

    let theirs = h
        .engine
        .coordinator
        .list_bookings("c2", BookingFilter::Upcoming, 1, 20)
        .await
        .unwrap();
    assert_eq!(theirs.total, 0);
}

#[tokio::test]
async fn reconciler_repairs_counter_drift() {
    let h = setup().await;
    seed_session(&h, "s1", MockType::SituationalJudgment, 10, ActivationState::Active, future_date())
        .await;
    seed_contact(&h, "c1", credits(5, 0, 0, 0, 0));

    h.engine
        .coordinator
        .create(create_cmd("c1", "s1", "Jane Doe", MockType::SituationalJudgment))
        .await
        .unwrap();

    // Simulate drift: the stored counter disagrees with the Active rows.
    let repo = SqlxSessionRepository::new(h.pool.clone());
    repo.set_total("s1", 7).await.unwrap();

    let report = h
        .engine
        .reconciler
        .run_once(Duration::hours(1))
        .await
        .unwrap();
    assert!(report.repaired >= 1);

    assert_eq!(total_bookings(&h, "s1").await, 1);
    assert_eq!(
        h.crm.prop(ObjectType::MockExam, "s1", "total_bookings").as_deref(),
        Some("1")
    );
}
