//! Session store: a thin CRM-first layer over the mock-exam object with a
//! fast-store projection behind it.
//!
//! Writes go CRM first (the CRM's automations watch its events), then
//! project; reads prefer the projection and fall back to the CRM through
//! the resolver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::booking::repository::BookingRepository;
use crate::cache::ReadCache;
use crate::crm::{CrmClient, ObjectType};
use crate::error::EngineError;
use crate::ids;
use crate::logger::warn_if_slow;
use crate::page::Page;
use crate::resolver::Resolver;
use crate::session::model::{ActivationState, Session, SessionDraft, SessionFilters};
use crate::session::repository::SessionRepository;

/// Result of one activation sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub activated: usize,
    pub failed: usize,
    pub total: usize,
}

pub struct SessionStore {
    crm: Arc<dyn CrmClient>,
    repo: Arc<dyn SessionRepository>,
    bookings: Arc<dyn BookingRepository>,
    resolver: Resolver,
    cache: ReadCache,
    batch_size: usize,
}

impl SessionStore {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        repo: Arc<dyn SessionRepository>,
        bookings: Arc<dyn BookingRepository>,
        resolver: Resolver,
        cache: ReadCache,
        batch_size: usize,
    ) -> Self {
        Self {
            crm,
            repo,
            bookings,
            resolver,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub fn repo(&self) -> Arc<dyn SessionRepository> {
        Arc::clone(&self.repo)
    }

    /// Projection-first read with CRM fallback, cached under the session's
    /// CRM id.
    #[instrument(skip(self), target = "session_store", fields(session_id = %id))]
    pub async fn get(&self, id: &str) -> Result<Option<Session>, EngineError> {
        let cache_key = ids::session_detail_key(id);
        if let Some(session) = self.cache.get_json::<Session>(&cache_key).await {
            return Ok(Some(session));
        }

        let Some(session) = self.resolver.session(id).await? else {
            return Ok(None);
        };

        self.cache
            .put_json(
                &ids::session_detail_key(&session.hubspot_id),
                &session,
                self.cache.listing_ttl(),
            )
            .await;
        Ok(Some(session))
    }

    /// Filtered listing over the projection, cached by filter fingerprint.
    #[instrument(skip(self, filters), target = "session_store")]
    pub async fn search(&self, filters: &SessionFilters) -> Result<Page<Session>, EngineError> {
        let filters = filters.clone().normalized();
        let cache_key =
            ids::sessions_list_key(&ids::filter_hash(&filters.cache_fingerprint()));

        if let Some(page) = self.cache.get_json::<Page<Session>>(&cache_key).await {
            return Ok(page);
        }

        let page = warn_if_slow("session_search", Duration::from_millis(200), async {
            self.repo.search(&filters).await
        })
        .await?;

        self.cache
            .put_json(&cache_key, &page, self.cache.listing_ttl())
            .await;
        Ok(page)
    }

    /// Create a session: validate, CRM first, then project and invalidate.
    #[instrument(skip(self, draft), target = "session_store")]
    pub async fn create(&self, draft: &SessionDraft) -> Result<Session, EngineError> {
        draft.validate(Utc::now()).map_err(EngineError::Validation)?;

        let now = Utc::now();
        let mut session = Session {
            uuid: Uuid::new_v4(),
            hubspot_id: String::new(),
            mock_type: draft.mock_type,
            exam_date: draft.exam_date,
            start_time: draft.start_time,
            end_time: draft.end_time,
            location: draft.location.clone(),
            capacity: draft.capacity,
            total_bookings: 0,
            activation: draft.activation,
            scheduled_activation_at: draft.scheduled_activation_at,
            created_at: now,
            updated_at: now,
            extra: HashMap::new(),
        };

        let record = self
            .crm
            .create(ObjectType::MockExam, session.to_crm_properties())
            .await?;
        session.hubspot_id = record.id;

        self.repo.upsert(&session).await?;
        self.cache
            .invalidate_session_write(&[&session.hubspot_id])
            .await;

        info!(session_id = %session.hubspot_id, "session created");
        Ok(session)
    }

    /// Update a session in place, enforcing the activation transition rules.
    #[instrument(skip(self, draft), target = "session_store", fields(session_id = %hubspot_id))]
    pub async fn update(
        &self,
        hubspot_id: &str,
        draft: &SessionDraft,
    ) -> Result<Session, EngineError> {
        draft.validate(Utc::now()).map_err(EngineError::Validation)?;

        let mut session = self
            .resolver
            .session(hubspot_id)
            .await?
            .ok_or_else(|| EngineError::ExamNotFound(hubspot_id.to_string()))?;

        let has_future_activation = draft
            .scheduled_activation_at
            .is_some_and(|at| at > Utc::now());
        if !session
            .activation
            .can_transition(draft.activation, has_future_activation)
        {
            return Err(EngineError::Validation(format!(
                "activation transition {} -> {} is not permitted",
                session.activation.as_str(),
                draft.activation.as_str()
            )));
        }

        session.mock_type = draft.mock_type;
        session.exam_date = draft.exam_date;
        session.start_time = draft.start_time;
        session.end_time = draft.end_time;
        session.location = draft.location.clone();
        session.capacity = draft.capacity;
        session.activation = draft.activation;
        session.scheduled_activation_at = match draft.activation {
            ActivationState::Scheduled => draft.scheduled_activation_at,
            _ => None,
        };
        session.updated_at = Utc::now();

        self.crm
            .update(
                ObjectType::MockExam,
                &session.hubspot_id,
                session.to_crm_properties(),
            )
            .await?;

        self.repo.upsert(&session).await?;
        self.cache
            .invalidate_session_write(&[&session.hubspot_id])
            .await;

        Ok(session)
    }

    /// Admin duplication: same shape as the source, new date/times, no
    /// bookings carried over.
    #[instrument(skip(self), target = "session_store", fields(source_id = %source_id))]
    pub async fn clone_session(
        &self,
        source_id: &str,
        exam_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Session, EngineError> {
        let source = self
            .resolver
            .session(source_id)
            .await?
            .ok_or_else(|| EngineError::ExamNotFound(source_id.to_string()))?;

        let draft = SessionDraft {
            mock_type: source.mock_type,
            exam_date,
            start_time,
            end_time,
            location: source.location.clone(),
            capacity: source.capacity,
            activation: ActivationState::Inactive,
            scheduled_activation_at: None,
        };

        self.create(&draft).await
    }

    /// Delete a session; refused while Active bookings still reference it.
    #[instrument(skip(self), target = "session_store", fields(session_id = %hubspot_id))]
    pub async fn delete(&self, hubspot_id: &str) -> Result<(), EngineError> {
        let active = self
            .bookings
            .count_active_for_session(hubspot_id)
            .await?;
        if active > 0 {
            return Err(EngineError::Validation(format!(
                "session {hubspot_id} still has {active} active bookings"
            )));
        }

        self.crm.delete(ObjectType::MockExam, hubspot_id).await?;
        self.repo.delete(hubspot_id).await?;
        self.cache.invalidate_session_write(&[hubspot_id]).await;

        info!(session_id = %hubspot_id, "session deleted");
        Ok(())
    }

    /// Flip `scheduled` sessions to `true` in CRM batches of at most
    /// `batch_size`, projecting and invalidating per chunk. A failed chunk
    /// is counted and retried by the next sweep.
    #[instrument(skip(self, ids), target = "session_store", fields(count = ids.len()))]
    pub async fn activate_batch(&self, ids: &[String]) -> Result<ActivationReport, EngineError> {
        let mut report = ActivationReport {
            total: ids.len(),
            ..Default::default()
        };

        for chunk in ids.chunks(self.batch_size) {
            let updates: Vec<(String, HashMap<String, String>)> = chunk
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        HashMap::from([("is_active".to_string(), "true".to_string())]),
                    )
                })
                .collect();

            if let Err(e) = self.crm.batch_update(ObjectType::MockExam, updates).await {
                report.failed += chunk.len();
                for id in chunk {
                    warn!(session_id = %id, error = %e, "activation chunk failed; will retry next tick");
                }
                continue;
            }

            for id in chunk {
                match self.repo.fetch_by_hubspot_id(id).await? {
                    Some(mut session) => {
                        session.activation = ActivationState::Active;
                        session.scheduled_activation_at = None;
                        session.updated_at = Utc::now();
                        self.repo.upsert(&session).await?;
                    }
                    None => {
                        warn!(session_id = %id, "activated session missing from projection");
                    }
                }
            }

            report.activated += chunk.len();
            let chunk_ids: Vec<&str> = chunk.iter().map(String::as_str).collect();
            self.cache.invalidate_session_write(&chunk_ids).await;
        }

        Ok(report)
    }

    /// Mirror a counter move onto the CRM session property so external
    /// automations observe the same `total_bookings`.
    pub async fn mirror_total(&self, hubspot_id: &str, value: i64) -> Result<(), EngineError> {
        self.crm
            .update(
                ObjectType::MockExam,
                hubspot_id,
                HashMap::from([("total_bookings".to_string(), value.to_string())]),
            )
            .await?;
        Ok(())
    }
}
