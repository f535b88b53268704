//! Booking coordinator: create, cancel, rebook.
//!
//! Responsibilities:
//! - Serialize all mutating booking work behind the per-session lock.
//! - Collapse accidental duplicates through the idempotency fingerprint.
//! - Sequence the two stores: CRM first, projection second.
//! - Compensate half-created bookings when the credit debit fails.
//!
//! Non-responsibilities:
//! - Transport, auth, and input shape validation (host concerns).
//! - CRM retry/backoff (CRM client concern).
//! - Counter repair (reconciliation pass).
//!
//! Write ordering on create is create → increment → debit: a failed create
//! moves nothing, a failed increment leaves a countable drift the
//! reconciler repairs, and a failed debit triggers compensation inside the
//! same lock window.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::booking::model::{
    Booking, BookingFilter, BookingStatus, CancelBooking, CancelOutcome, CreateBooking,
    CreateOutcome, RebookBooking, RebookOutcome,
};
use crate::booking::repository::BookingRepository;
use crate::cache::ReadCache;
use crate::contact::model::{Contact, CreditBalance, CreditField};
use crate::counter::BookingCounter;
use crate::crm::{CrmClient, ObjectType};
use crate::error::{EngineError, Warning};
use crate::ids::{self, IdempotencyParts};
use crate::ledger::{self, CreditLedger, CreditSummary};
use crate::lock::{LockManager, LockToken};
use crate::metrics::counters::Counters;
use crate::page::Page;
use crate::resolver::Resolver;
use crate::session::model::Session;
use crate::session::store::SessionStore;
use crate::time::now_ms;

pub struct BookingCoordinator {
    crm: Arc<dyn CrmClient>,
    bookings: Arc<dyn BookingRepository>,
    sessions: Arc<SessionStore>,
    resolver: Resolver,
    ledger: Arc<CreditLedger>,
    counter: Arc<BookingCounter>,
    locks: LockManager,
    cache: ReadCache,
    idempotency_bucket_ms: u64,
    counters: Counters,
}

impl BookingCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crm: Arc<dyn CrmClient>,
        bookings: Arc<dyn BookingRepository>,
        sessions: Arc<SessionStore>,
        resolver: Resolver,
        ledger: Arc<CreditLedger>,
        counter: Arc<BookingCounter>,
        locks: LockManager,
        cache: ReadCache,
        idempotency_bucket_ms: u64,
        counters: Counters,
    ) -> Self {
        Self {
            crm,
            bookings,
            sessions,
            resolver,
            ledger,
            counter,
            locks,
            cache,
            idempotency_bucket_ms: idempotency_bucket_ms.max(1),
            counters,
        }
    }

    /* =========================
    Create
    ========================= */

    #[instrument(
        skip(self, cmd),
        target = "coordinator",
        fields(contact_id = %cmd.contact_id, session_id = %cmd.session_id, mock_type = cmd.mock_type.as_str())
    )]
    pub async fn create(&self, cmd: CreateBooking) -> Result<CreateOutcome, EngineError> {
        cmd.validate()?;

        let contact = self
            .resolver
            .contact(&cmd.contact_id)
            .await?
            .ok_or_else(|| EngineError::ContactNotFound(cmd.contact_id.clone()))?;

        // Idempotent short-circuit before any lock is taken.
        let idem_key = match self.resolve_idempotency(&cmd, &contact).await? {
            IdemResolution::Replay(outcome) => return Ok(*outcome),
            IdemResolution::Fresh(key) => key,
        };

        // The command may carry either identifier; the lock is always keyed
        // by the CRM id.
        let session_ref = self
            .resolver
            .session(&cmd.session_id)
            .await?
            .ok_or_else(|| EngineError::ExamNotFound(cmd.session_id.clone()))?;
        let session_id = session_ref.hubspot_id.clone();

        let lock_key = LockManager::session_key(&session_id);
        let Some(token) = self.locks.acquire_session(&session_id).await? else {
            self.counters.lock_failures.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::LockAcquisitionFailed("session".into()));
        };

        let mut warnings = Vec::new();
        let result = self
            .create_locked(&cmd, &contact, &session_id, &idem_key, &lock_key, &token, &mut warnings)
            .await;

        if let Err(e) = self.locks.release(&lock_key, &token).await {
            warn!(error = %e, "session lock release failed");
        }

        let (booking, specific_after, shared_after) = match result? {
            LockedCreate::Replay(existing) => {
                // A racing request with the same key won the lock first.
                self.counters.idempotent_hits.fetch_add(1, Ordering::Relaxed);
                let summary = self
                    .ledger
                    .credits(&contact.hubspot_id, cmd.mock_type)
                    .await?;
                return Ok(CreateOutcome {
                    idempotency_key: existing.idempotency_key.clone(),
                    booking: existing,
                    specific_after: summary.specific,
                    shared_after: summary.shared,
                    idempotent_request: true,
                    warnings: Vec::new(),
                });
            }
            LockedCreate::Created {
                booking,
                specific_after,
                shared_after,
            } => (booking, specific_after, shared_after),
        };

        // Best-effort from here on: cache invalidation must never fail a
        // booking that the CRM already holds.
        self.cache
            .invalidate_booking_write(&contact.hubspot_id, &[&session_id])
            .await;

        self.counters.bookings_created.fetch_add(1, Ordering::Relaxed);
        info!(booking_id = %booking.booking_id, "booking created");

        Ok(CreateOutcome {
            booking,
            specific_after,
            shared_after,
            idempotency_key: idem_key,
            idempotent_request: false,
            warnings,
        })
    }

    /// The lock-guarded section of create: validate, create in CRM,
    /// associate, count, debit, compensate on debit failure.
    #[allow(clippy::too_many_arguments)]
    async fn create_locked(
        &self,
        cmd: &CreateBooking,
        contact: &Contact,
        session_id: &str,
        idem_key: &str,
        lock_key: &str,
        token: &LockToken,
        warnings: &mut Vec<Warning>,
    ) -> Result<LockedCreate, EngineError> {
        // Re-check the idempotency key now that we are serialized: a racing
        // duplicate that won the lock has already projected its booking.
        if let Some(existing) = self.bookings.fetch_by_idempotency_key(idem_key).await? {
            if matches!(
                existing.status,
                BookingStatus::Active | BookingStatus::Completed
            ) {
                return Ok(LockedCreate::Replay(existing));
            }
        }

        // Re-read inside the lock; capacity reads outside it are advisory.
        let session = self
            .resolver
            .session(session_id)
            .await?
            .ok_or_else(|| EngineError::ExamNotFound(session_id.to_string()))?;

        if !session.is_bookable() {
            return Err(EngineError::ExamNotActive(session_id.to_string()));
        }
        if session.total_bookings >= session.capacity {
            return Err(EngineError::ExamFull(session_id.to_string()));
        }

        let (field, balance) = self
            .ledger
            .resolve_under_lock(&contact.hubspot_id, cmd.mock_type)
            .await?;

        let booking_id = ids::booking_id(cmd.mock_type, &cmd.name, session.exam_date);
        if let Some(existing) = self.bookings.fetch_active_by_booking_id(&booking_id).await? {
            return Err(EngineError::DuplicateBooking(existing.booking_id));
        }

        let now = Utc::now();
        let mut booking = Booking {
            uuid: Uuid::new_v4(),
            hubspot_id: None,
            booking_id,
            associated_session: session.hubspot_id.clone(),
            associated_contact: contact.hubspot_id.clone(),
            student_id: cmd.student_id.clone(),
            name: cmd.name.clone(),
            email: cmd.email.to_lowercase(),
            mock_type: session.mock_type,
            exam_date: session.exam_date,
            start_time: session.start_time,
            end_time: session.end_time,
            status: BookingStatus::Active,
            attendance: None,
            attending_location: cmd.attending_location.clone(),
            dominant_hand: cmd.dominant_hand,
            token_used: Some(field),
            idempotency_key: idem_key.to_string(),
            created_at: now,
            updated_at: now,
            extra: Default::default(),
        };

        let record = self
            .crm
            .create(ObjectType::Booking, booking.to_crm_create_properties())
            .await?;
        booking.hubspot_id = Some(record.id.clone());

        // Projection happens synchronously inside the lock window: the
        // idempotent short-circuit and the duplicate check read it back
        // here, so fire-and-forget would reopen the race they close.
        if let Err(e) = self.bookings.upsert(&booking).await {
            warn!(error = %e, "booking projection failed");
            warnings.push(Warning::projection_failed(e.to_string()));
        }

        // Associations are one success/warning unit and never roll back the
        // booking.
        let (assoc_contact, assoc_session) = futures::join!(
            self.crm.associate(
                ObjectType::Booking,
                &record.id,
                ObjectType::Contact,
                &contact.hubspot_id,
            ),
            self.crm.associate(
                ObjectType::Booking,
                &record.id,
                ObjectType::MockExam,
                &session.hubspot_id,
            )
        );
        if let Err(e) = assoc_contact.and(assoc_session) {
            warn!(error = %e, "booking associations failed");
            warnings.push(Warning::association_failed(e.to_string()));
        }

        match self.counter.increment(&session.hubspot_id, 1).await {
            Ok(new_count) => {
                if let Err(e) = self.sessions.mirror_total(&session.hubspot_id, new_count).await {
                    warn!(error = %e, "failed to mirror total_bookings to crm");
                }
            }
            Err(e) => {
                // Over/under-count is repaired by reconciliation; this is
                // deliberately not a rollback trigger.
                warn!(error = %e, "counter increment failed");
                warnings.push(Warning::projection_failed(format!(
                    "counter increment failed: {e}"
                )));
            }
        }

        let remaining = match self.ledger.deduct(&contact.hubspot_id, field).await {
            Ok(remaining) => remaining,
            Err(debit_err) => {
                // The student must not hold a seat paid for with a credit
                // that was never debited; undo the create inside the same
                // lock window.
                return Err(self
                    .compensate_failed_debit(
                        &record.id,
                        &booking.uuid,
                        &session.hubspot_id,
                        debit_err,
                    )
                    .await);
            }
        };

        // Lease-lapse guard: if the lock expired mid-transaction, a retry
        // may have raced us. Never report success on assumption alone.
        if !self.locks.still_held(lock_key, token).await? {
            warn!("session lock lapsed during create; re-verifying booking");
            let verified = self
                .crm
                .get(ObjectType::Booking, &record.id, &["booking_id", "is_active"])
                .await?;
            if verified.is_none() {
                return Err(EngineError::Internal(anyhow::anyhow!(
                    "booking {} vanished after lock lease expired",
                    record.id
                )));
            }
        }

        let (specific_after, shared_after) =
            balances_after(cmd.mock_type, field, &balance, remaining);
        Ok(LockedCreate::Created {
            booking,
            specific_after,
            shared_after,
        })
    }

    /// Delete the half-created booking (both stores) and take back the
    /// counter move.
    async fn compensate_failed_debit(
        &self,
        booking_crm_id: &str,
        booking_uuid: &Uuid,
        session_id: &str,
        debit_err: EngineError,
    ) -> EngineError {
        let deleted = self.crm.delete(ObjectType::Booking, booking_crm_id).await;
        let unprojected = self.bookings.delete(booking_uuid).await;
        let decremented = self.counter.decrement(session_id, 1).await;

        match (&deleted, &unprojected, &decremented) {
            (Ok(()), Ok(()), Ok(new_count)) => {
                if let Err(e) = self.sessions.mirror_total(session_id, *new_count).await {
                    warn!(error = %e, "failed to mirror compensated total_bookings");
                }
                self.counters.cleanups_performed.fetch_add(1, Ordering::Relaxed);
                info!(
                    booking_crm_id,
                    event = "CLEANUP_PERFORMED",
                    "rolled back half-created booking after debit failure"
                );
                debit_err
            }
            _ => {
                self.counters.cleanups_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    booking_crm_id,
                    delete_err = ?deleted.as_ref().err(),
                    projection_err = ?unprojected.as_ref().err(),
                    counter_err = ?decremented.as_ref().err(),
                    event = "CLEANUP_FAILED",
                    "compensation after debit failure did not complete"
                );
                EngineError::CleanupFailed(format!(
                    "booking {booking_crm_id} partially created; original error: {debit_err}"
                ))
            }
        }
    }

    /// Derive or adopt the idempotency key and detect replays.
    async fn resolve_idempotency(
        &self,
        cmd: &CreateBooking,
        contact: &Contact,
    ) -> Result<IdemResolution, EngineError> {
        let exam_date = cmd.exam_date.format("%Y-%m-%d").to_string();
        let derive = |offset: u64, retry: bool| {
            ids::idempotency_key(&IdempotencyParts {
                contact_id: &contact.hubspot_id,
                session_id: &cmd.session_id,
                exam_date: &exam_date,
                mock_type: cmd.mock_type,
                now_ms: now_ms(),
                bucket_ms: self.idempotency_bucket_ms,
                bucket_offset: offset,
                retry_after_cancel: retry,
            })
        };

        let key = cmd.idempotency_key.clone().unwrap_or_else(|| derive(0, false));

        match self.bookings.fetch_by_idempotency_key(&key).await? {
            Some(existing)
                if matches!(
                    existing.status,
                    BookingStatus::Active | BookingStatus::Completed
                ) =>
            {
                // Active or Completed: return the prior outcome verbatim.
                self.counters.idempotent_hits.fetch_add(1, Ordering::Relaxed);
                info!(booking_id = %existing.booking_id, "idempotent replay detected");

                let summary = self
                    .ledger
                    .credits(&contact.hubspot_id, cmd.mock_type)
                    .await?;

                Ok(IdemResolution::Replay(Box::new(CreateOutcome {
                    idempotency_key: existing.idempotency_key.clone(),
                    booking: existing,
                    specific_after: summary.specific,
                    shared_after: summary.shared,
                    idempotent_request: true,
                    warnings: Vec::new(),
                })))
            }
            Some(_) => {
                // Cancelled: bump the bucket so the retry books a fresh seat
                // instead of replaying a dead outcome.
                Ok(IdemResolution::Fresh(derive(1, true)))
            }
            None => Ok(IdemResolution::Fresh(key)),
        }
    }

    /* =========================
    Cancel
    ========================= */

    #[instrument(
        skip(self, cmd),
        target = "coordinator",
        fields(identifier = %cmd.identifier, actor = ?cmd.actor)
    )]
    pub async fn cancel(&self, cmd: CancelBooking) -> Result<CancelOutcome, EngineError> {
        let booking = self
            .resolver
            .booking(&cmd.identifier)
            .await?
            .ok_or_else(|| EngineError::BookingNotFound(cmd.identifier.clone()))?;

        // Cancelling a terminal booking is a no-op success.
        if booking.status.is_terminal() {
            return Ok(CancelOutcome {
                booking,
                already_terminal: true,
                warnings: Vec::new(),
            });
        }

        let session_id = booking.associated_session.clone();
        let lock_key = LockManager::session_key(&session_id);
        let Some(token) = self.locks.acquire_session(&session_id).await? else {
            self.counters.lock_failures.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::LockAcquisitionFailed("session".into()));
        };

        let mut warnings = Vec::new();
        let result = self
            .cancel_locked(&cmd, &booking, &session_id, &mut warnings)
            .await;

        if let Err(e) = self.locks.release(&lock_key, &token).await {
            warn!(error = %e, "session lock release failed");
        }

        let booking = result?;

        self.cache
            .invalidate_booking_write(&booking.associated_contact, &[&session_id])
            .await;
        self.counters.bookings_cancelled.fetch_add(1, Ordering::Relaxed);
        info!(booking_id = %booking.booking_id, reason = ?cmd.reason, "booking cancelled");

        Ok(CancelOutcome {
            booking,
            already_terminal: false,
            warnings,
        })
    }

    async fn cancel_locked(
        &self,
        cmd: &CancelBooking,
        booking: &Booking,
        session_id: &str,
        warnings: &mut Vec<Warning>,
    ) -> Result<Booking, EngineError> {
        let now = Utc::now();

        // CRM first; the projection follows synchronously because the
        // terminal-state check above reads it.
        if let Some(crm_id) = &booking.hubspot_id {
            self.crm
                .update(
                    ObjectType::Booking,
                    crm_id,
                    std::collections::HashMap::from([(
                        "is_active".to_string(),
                        BookingStatus::Cancelled.as_str().to_string(),
                    )]),
                )
                .await?;
        }
        self.bookings
            .set_status(&booking.uuid, BookingStatus::Cancelled, now)
            .await?;

        // A failed refund never fails the cancellation; admins reconcile
        // from the flagged warning.
        if cmd.refund_tokens {
            match booking.token_used {
                Some(field) => {
                    if let Err(e) = self.ledger.restore(&booking.associated_contact, field).await {
                        warn!(error = %e, field = field.as_str(), "credit refund failed");
                        warnings.push(Warning::credit_refund_failed(format!(
                            "restore of {} failed: {e}",
                            field.as_str()
                        )));
                    }
                }
                None => {
                    warnings.push(Warning::credit_refund_failed(
                        "token_used unknown; nothing to restore",
                    ));
                }
            }
        }

        match self.counter.decrement(session_id, 1).await {
            Ok(new_count) => {
                if let Err(e) = self.sessions.mirror_total(session_id, new_count).await {
                    warn!(error = %e, "failed to mirror total_bookings to crm");
                }
            }
            Err(e) => {
                warn!(error = %e, "counter decrement failed");
                warnings.push(Warning::projection_failed(format!(
                    "counter decrement failed: {e}"
                )));
            }
        }

        let mut cancelled = booking.clone();
        cancelled.status = BookingStatus::Cancelled;
        cancelled.updated_at = now;
        Ok(cancelled)
    }

    /* =========================
    Rebook
    ========================= */

    #[instrument(
        skip(self, cmd),
        target = "coordinator",
        fields(identifier = %cmd.identifier, new_session_id = %cmd.new_session_id)
    )]
    pub async fn rebook(&self, cmd: RebookBooking) -> Result<RebookOutcome, EngineError> {
        let booking = self
            .resolver
            .booking(&cmd.identifier)
            .await?
            .ok_or_else(|| EngineError::BookingNotFound(cmd.identifier.clone()))?;

        match booking.status {
            BookingStatus::Cancelled => {
                return Err(EngineError::BookingCancelled(cmd.identifier.clone()));
            }
            BookingStatus::Completed => {
                return Err(EngineError::Validation(
                    "completed bookings cannot be rebooked".into(),
                ));
            }
            BookingStatus::Active => {}
        }

        // Rebook targets resolve from the projection only.
        let target = self
            .resolver
            .session_projected(&cmd.new_session_id)
            .await?
            .ok_or_else(|| EngineError::ExamNotFound(cmd.new_session_id.clone()))?;

        if !target.is_bookable() {
            return Err(EngineError::ExamNotActive(target.hubspot_id.clone()));
        }
        if target.exam_date < Utc::now().date_naive() {
            return Err(EngineError::ExamPastDate(
                target.exam_date.format("%Y-%m-%d").to_string(),
            ));
        }
        if target.mock_type != booking.mock_type {
            return Err(EngineError::ExamTypeMismatch {
                booked: booking.mock_type.as_str().to_string(),
                target: target.mock_type.as_str().to_string(),
            });
        }

        let old_session_id = booking.associated_session.clone();
        let lock_key = LockManager::session_key(&target.hubspot_id);
        let Some(token) = self.locks.acquire_session(&target.hubspot_id).await? else {
            self.counters.lock_failures.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::LockAcquisitionFailed("session".into()));
        };

        let mut warnings = Vec::new();
        let result = self
            .rebook_locked(&booking, &target, &mut warnings)
            .await;

        if let Err(e) = self.locks.release(&lock_key, &token).await {
            warn!(error = %e, "session lock release failed");
        }

        let moved = result?;

        self.cache
            .invalidate_booking_write(
                &moved.associated_contact,
                &[old_session_id.as_str(), target.hubspot_id.as_str()],
            )
            .await;
        self.counters.bookings_rebooked.fetch_add(1, Ordering::Relaxed);
        info!(booking_id = %moved.booking_id, "booking moved to new session");

        Ok(RebookOutcome {
            booking: moved,
            warnings,
        })
    }

    /// Rebook writes the fast store first (it is the authoritative read
    /// path for bookings), then best-effort syncs the CRM association.
    /// No credit moves and no counter moves: the seat travels with the
    /// booking.
    async fn rebook_locked(
        &self,
        booking: &Booking,
        target: &Session,
        warnings: &mut Vec<Warning>,
    ) -> Result<Booking, EngineError> {
        let now = Utc::now();
        let old_session_id = booking.associated_session.clone();

        self.bookings
            .relink_session(
                &booking.uuid,
                &target.hubspot_id,
                target.exam_date,
                target.start_time,
                target.end_time,
                now,
            )
            .await?;

        if let Some(crm_id) = &booking.hubspot_id {
            let swap = async {
                self.crm
                    .disassociate(
                        ObjectType::Booking,
                        crm_id,
                        ObjectType::MockExam,
                        &old_session_id,
                    )
                    .await?;
                self.crm
                    .associate(
                        ObjectType::Booking,
                        crm_id,
                        ObjectType::MockExam,
                        &target.hubspot_id,
                    )
                    .await
            }
            .await;

            if let Err(e) = swap {
                warn!(error = %e, "crm association swap failed; projection is ahead of crm");
                warnings.push(Warning::association_failed(e.to_string()));
            }
        }

        let mut moved = booking.clone();
        moved.associated_session = target.hubspot_id.clone();
        moved.exam_date = target.exam_date;
        moved.start_time = target.start_time;
        moved.end_time = target.end_time;
        moved.updated_at = now;
        Ok(moved)
    }

    /* =========================
    Reads
    ========================= */

    /// Per-contact booking list, cached with a filter-dependent TTL.
    #[instrument(skip(self), target = "coordinator", fields(contact_id = %contact_id))]
    pub async fn list_bookings(
        &self,
        contact_id: &str,
        filter: BookingFilter,
        page: u32,
        limit: u32,
    ) -> Result<Page<Booking>, EngineError> {
        let contact = self
            .resolver
            .contact(contact_id)
            .await?
            .ok_or_else(|| EngineError::ContactNotFound(contact_id.to_string()))?;

        let key = ids::bookings_contact_key(&contact.hubspot_id, filter.as_str(), page, limit);
        if let Some(cached) = self.cache.get_json::<Page<Booking>>(&key).await {
            return Ok(cached);
        }

        let result = self
            .bookings
            .list_by_contact(
                &contact.hubspot_id,
                filter,
                Utc::now().date_naive(),
                page,
                limit,
            )
            .await?;

        self.cache
            .put_json(&key, &result, self.cache.booking_list_ttl(filter))
            .await;
        Ok(result)
    }

    /// Credit availability for a contact and mock type.
    pub async fn credits(
        &self,
        contact_id: &str,
        mock_type: crate::session::model::MockType,
    ) -> Result<CreditSummary, EngineError> {
        let contact = self
            .resolver
            .contact(contact_id)
            .await?
            .ok_or_else(|| EngineError::ContactNotFound(contact_id.to_string()))?;

        self.ledger.credits(&contact.hubspot_id, mock_type).await
    }
}

enum IdemResolution {
    /// An equivalent live booking exists; return it verbatim.
    Replay(Box<CreateOutcome>),
    /// No live duplicate; proceed with this key.
    Fresh(String),
}

enum LockedCreate {
    Created {
        booking: Booking,
        specific_after: u32,
        shared_after: u32,
    },
    /// A same-key booking materialized between the pre-lock check and lock
    /// acquisition.
    Replay(Booking),
}

/// Post-debit balances split into the (specific, shared) pair the outcome
/// reports. The pool that was not debited keeps its pre-debit value.
fn balances_after(
    mock_type: crate::session::model::MockType,
    field: CreditField,
    before: &CreditBalance,
    remaining: u32,
) -> (u32, u32) {
    if field == CreditField::Shared {
        (before.get(ledger::primary_field(mock_type)), remaining)
    } else {
        (remaining, before.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balances_after_specific_debit() {
        let before = CreditBalance {
            sj: 2,
            cs: 0,
            sjmini: 0,
            mock_discussion: 0,
            shared: 5,
        };
        let (specific, shared) = balances_after(
            crate::session::model::MockType::SituationalJudgment,
            CreditField::Sj,
            &before,
            1,
        );
        assert_eq!((specific, shared), (1, 5));
    }

    #[test]
    fn balances_after_shared_debit() {
        let before = CreditBalance {
            sj: 0,
            cs: 0,
            sjmini: 0,
            mock_discussion: 0,
            shared: 3,
        };
        let (specific, shared) = balances_after(
            crate::session::model::MockType::SituationalJudgment,
            CreditField::Shared,
            &before,
            2,
        );
        assert_eq!((specific, shared), (0, 2));
    }

}
