//! Uniform read path: fast store first, CRM fallback, opportunistic
//! backfill of the projection through the sync queue.
//!
//! The resolver also owns the cascading booking lookup (local uuid, then
//! CRM id) that papers over partial-sync states.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::booking::model::Booking;
use crate::booking::repository::BookingRepository;
use crate::contact::model::Contact;
use crate::contact::repository::ContactRepository;
use crate::crm::{CrmClient, ObjectType};
use crate::error::EngineError;
use crate::ledger::CONTACT_CRM_PROPERTIES;
use crate::session::model::Session;
use crate::session::repository::SessionRepository;
use crate::sync::{SyncHandle, SyncJob};

pub const SESSION_CRM_PROPERTIES: &[&str] = &[
    "mock_type",
    "exam_date",
    "start_time",
    "end_time",
    "location",
    "capacity",
    "total_bookings",
    "is_active",
    "scheduled_activation_datetime",
    "createdate",
    "hs_lastmodifieddate",
];

pub const BOOKING_CRM_PROPERTIES: &[&str] = &[
    "booking_id",
    "name",
    "email",
    "student_id",
    "is_active",
    "token_used",
    "idempotency_key",
    "dominant_hand",
    "attending_location",
    "attendance",
    "mock_type",
    "exam_date",
    "start_time",
    "end_time",
    "createdate",
    "hs_lastmodifieddate",
];

#[derive(Clone)]
pub struct Resolver {
    crm: Arc<dyn CrmClient>,
    contacts: Arc<dyn ContactRepository>,
    sessions: Arc<dyn SessionRepository>,
    bookings: Arc<dyn BookingRepository>,
    sync: SyncHandle,
}

impl Resolver {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        contacts: Arc<dyn ContactRepository>,
        sessions: Arc<dyn SessionRepository>,
        bookings: Arc<dyn BookingRepository>,
        sync: SyncHandle,
    ) -> Self {
        Self {
            crm,
            contacts,
            sessions,
            bookings,
            sync,
        }
    }

    #[instrument(skip(self), target = "resolver", fields(id = %id))]
    pub async fn contact(&self, id: &str) -> Result<Option<Contact>, EngineError> {
        let projected = match Uuid::parse_str(id) {
            Ok(uuid) => self.contacts.fetch_by_uuid(&uuid).await?,
            Err(_) => self.contacts.fetch_by_hubspot_id(id).await?,
        };
        if let Some(contact) = projected {
            return Ok(Some(contact));
        }

        let Some(record) = self
            .crm
            .get(ObjectType::Contact, id, CONTACT_CRM_PROPERTIES)
            .await?
        else {
            return Ok(None);
        };

        debug!("contact missing from projection; backfilling from crm");
        let contact = Contact::from_crm(&record, Uuid::new_v4())?;
        self.sync.enqueue(SyncJob::ProjectContact(contact.clone()));
        Ok(Some(contact))
    }

    #[instrument(skip(self), target = "resolver", fields(id = %id))]
    pub async fn session(&self, id: &str) -> Result<Option<Session>, EngineError> {
        let projected = match Uuid::parse_str(id) {
            Ok(uuid) => self.sessions.fetch_by_uuid(&uuid).await?,
            Err(_) => self.sessions.fetch_by_hubspot_id(id).await?,
        };
        if let Some(session) = projected {
            return Ok(Some(session));
        }

        let Some(record) = self
            .crm
            .get(ObjectType::MockExam, id, SESSION_CRM_PROPERTIES)
            .await?
        else {
            return Ok(None);
        };

        debug!("session missing from projection; backfilling from crm");
        let session = Session::from_crm(&record, Uuid::new_v4())?;
        self.sync.enqueue(SyncJob::ProjectSession(session.clone()));
        Ok(Some(session))
    }

    /// Fast-store lookup only, no CRM fallback. Rebook targets use this.
    pub async fn session_projected(&self, id: &str) -> Result<Option<Session>, EngineError> {
        let projected = match Uuid::parse_str(id) {
            Ok(uuid) => self.sessions.fetch_by_uuid(&uuid).await?,
            Err(_) => self.sessions.fetch_by_hubspot_id(id).await?,
        };
        Ok(projected)
    }

    /// Cascading booking lookup: local uuid, then CRM id against the
    /// projection, then the CRM itself (associations resolved separately).
    #[instrument(skip(self), target = "resolver", fields(identifier = %identifier))]
    pub async fn booking(&self, identifier: &str) -> Result<Option<Booking>, EngineError> {
        if let Ok(uuid) = Uuid::parse_str(identifier) {
            if let Some(b) = self.bookings.fetch_by_uuid(&uuid).await? {
                return Ok(Some(b));
            }
        }

        if let Some(b) = self.bookings.fetch_by_hubspot_id(identifier).await? {
            return Ok(Some(b));
        }

        let Some(record) = self
            .crm
            .get(ObjectType::Booking, identifier, BOOKING_CRM_PROPERTIES)
            .await?
        else {
            return Ok(None);
        };

        let session_ids = self
            .crm
            .associations_of(ObjectType::Booking, identifier, ObjectType::MockExam)
            .await?;
        let contact_ids = self
            .crm
            .associations_of(ObjectType::Booking, identifier, ObjectType::Contact)
            .await?;

        debug!("booking missing from projection; backfilling from crm");
        let booking = Booking::from_crm(
            &record,
            Uuid::new_v4(),
            session_ids.into_iter().next().unwrap_or_default(),
            contact_ids.into_iter().next().unwrap_or_default(),
        )?;
        self.sync.enqueue(SyncJob::ProjectBooking(booking.clone()));
        Ok(Some(booking))
    }
}
