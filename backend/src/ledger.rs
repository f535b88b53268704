//! Credit ledger: which pool pays for a booking, and the atomic
//! deduct/restore of that pool.
//!
//! Pool typing: SJ and CS fall through to the shared pool when their own
//! pool is empty; Mini-mock and Mock Discussion never touch the shared pool.
//! All mutations run under the contact lock and are CRM-first, with the
//! fast-store projection trailing through the sync queue.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::contact::model::{Contact, CreditBalance, CreditField};
use crate::contact::repository::ContactRepository;
use crate::crm::{CrmClient, ObjectType};
use crate::error::EngineError;
use crate::lock::LockManager;
use crate::session::model::MockType;
use crate::sync::{SyncHandle, SyncJob};

/// Upper bound applied on restore; input validation, not business logic.
const CREDIT_CAP: u32 = 9999;

pub const CONTACT_CRM_PROPERTIES: &[&str] = &[
    "student_id",
    "email",
    "firstname",
    "lastname",
    "sj_credits",
    "cs_credits",
    "sjmini_credits",
    "mock_discussion_credits",
    "shared_credits",
    "createdate",
    "hs_lastmodifieddate",
];

/// The pool a mock type debits before any fall-through.
pub fn primary_field(mock_type: MockType) -> CreditField {
    match mock_type {
        MockType::SituationalJudgment => CreditField::Sj,
        MockType::ClinicalSkills => CreditField::Cs,
        MockType::MiniMock => CreditField::Sjmini,
        MockType::MockDiscussion => CreditField::MockDiscussion,
    }
}

/// Only SJ and CS may spend the shared pool.
pub fn allows_shared(mock_type: MockType) -> bool {
    matches!(
        mock_type,
        MockType::SituationalJudgment | MockType::ClinicalSkills
    )
}

/// The exact field a booking of `mock_type` would debit under `balance`,
/// or `None` when every legal pool is empty.
pub fn resolve_field(mock_type: MockType, balance: &CreditBalance) -> Option<CreditField> {
    let primary = primary_field(mock_type);
    if balance.get(primary) > 0 {
        return Some(primary);
    }
    if allows_shared(mock_type) && balance.shared > 0 {
        return Some(CreditField::Shared);
    }
    None
}

/// Credit availability for a (contact, mock type) pair.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CreditSummary {
    pub specific: u32,
    pub shared: u32,
    pub available: u32,
    pub eligible: bool,
}

impl CreditSummary {
    pub fn for_type(mock_type: MockType, balance: &CreditBalance) -> Self {
        let specific = balance.get(primary_field(mock_type));
        let shared = balance.shared;
        let available = if allows_shared(mock_type) {
            specific + shared
        } else {
            specific
        };

        Self {
            specific,
            shared,
            available,
            eligible: resolve_field(mock_type, balance).is_some(),
        }
    }
}

pub struct CreditLedger {
    crm: Arc<dyn CrmClient>,
    contacts: Arc<dyn ContactRepository>,
    locks: LockManager,
    sync: SyncHandle,
}

impl CreditLedger {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        contacts: Arc<dyn ContactRepository>,
        locks: LockManager,
        sync: SyncHandle,
    ) -> Self {
        Self {
            crm,
            contacts,
            locks,
            sync,
        }
    }

    /// Resolve the payable field against the canonical balance, serialized
    /// against concurrent debits of the same contact.
    #[instrument(skip(self), target = "ledger", fields(contact_id = %contact_hubspot_id))]
    pub async fn resolve_under_lock(
        &self,
        contact_hubspot_id: &str,
        mock_type: MockType,
    ) -> Result<(CreditField, CreditBalance), EngineError> {
        let key = LockManager::contact_key(contact_hubspot_id);
        let Some(token) = self.locks.acquire_contact(contact_hubspot_id).await? else {
            return Err(EngineError::LockAcquisitionFailed("contact".into()));
        };

        let out = async {
            let contact = self.read_canonical(contact_hubspot_id).await?;
            let field = resolve_field(mock_type, &contact.credits).ok_or_else(|| {
                EngineError::InsufficientCredits(primary_field(mock_type).as_str().into())
            })?;
            Ok((field, contact.credits))
        }
        .await;

        if let Err(e) = self.locks.release(&key, &token).await {
            warn!(error = %e, "contact lock release failed");
        }
        out
    }

    /// Debit one credit from `field`. Refuses (without writing) when the
    /// pool is already empty. Returns the post-value.
    #[instrument(skip(self), target = "ledger", fields(contact_id = %contact_hubspot_id, field = field.as_str()))]
    pub async fn deduct(
        &self,
        contact_hubspot_id: &str,
        field: CreditField,
    ) -> Result<u32, EngineError> {
        self.mutate(contact_hubspot_id, field, |current| {
            if current == 0 {
                return Err(EngineError::InsufficientCredits(field.as_str().into()));
            }
            Ok(current - 1)
        })
        .await
    }

    /// Return one credit to `field`, capped at 9999. Returns the post-value.
    #[instrument(skip(self), target = "ledger", fields(contact_id = %contact_hubspot_id, field = field.as_str()))]
    pub async fn restore(
        &self,
        contact_hubspot_id: &str,
        field: CreditField,
    ) -> Result<u32, EngineError> {
        self.mutate(contact_hubspot_id, field, |current| {
            Ok((current + 1).min(CREDIT_CAP))
        })
        .await
    }

    /// Credit availability for GetCredits. Balances gate spending, so this
    /// reads the canonical CRM value and only serves the projection when
    /// the CRM is unreachable; a stale `eligible: true` misleads the user
    /// into a booking that will fail.
    pub async fn credits(
        &self,
        contact_hubspot_id: &str,
        mock_type: MockType,
    ) -> Result<CreditSummary, EngineError> {
        match self.read_canonical(contact_hubspot_id).await {
            Ok(contact) => {
                self.sync.enqueue(SyncJob::ProjectContact(contact.clone()));
                Ok(CreditSummary::for_type(mock_type, &contact.credits))
            }
            Err(EngineError::CrmUnavailable(e)) => {
                warn!(error = %e, "crm unavailable for credit read; serving projection");
                let contact = self
                    .contacts
                    .fetch_by_hubspot_id(contact_hubspot_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::ContactNotFound(contact_hubspot_id.to_string())
                    })?;
                Ok(CreditSummary::for_type(mock_type, &contact.credits))
            }
            Err(e) => Err(e),
        }
    }

    /// Read-modify-write of a single pool under the contact lock,
    /// CRM first, projection second.
    async fn mutate(
        &self,
        contact_hubspot_id: &str,
        field: CreditField,
        apply: impl FnOnce(u32) -> Result<u32, EngineError>,
    ) -> Result<u32, EngineError> {
        let key = LockManager::contact_key(contact_hubspot_id);
        let Some(token) = self.locks.acquire_contact(contact_hubspot_id).await? else {
            return Err(EngineError::LockAcquisitionFailed("contact".into()));
        };

        let out = async {
            let contact = self.read_canonical(contact_hubspot_id).await?;
            let current = contact.credits.get(field);
            let new_value = apply(current)?;

            self.crm
                .update(
                    ObjectType::Contact,
                    contact_hubspot_id,
                    HashMap::from([(field.crm_property().to_string(), new_value.to_string())]),
                )
                .await?;

            // projection trails the CRM write inside the same lock window
            if let Err(e) = self
                .contacts
                .set_credit(contact_hubspot_id, field, new_value)
                .await
            {
                warn!(error = %e, "credit projection failed; reconciliation will repair");
            }

            info!(from = current, to = new_value, "credit pool updated");
            Ok(new_value)
        }
        .await;

        if let Err(e) = self.locks.release(&key, &token).await {
            warn!(error = %e, "contact lock release failed");
        }
        out
    }

    async fn read_canonical(&self, contact_hubspot_id: &str) -> Result<Contact, EngineError> {
        let record = self
            .crm
            .get(ObjectType::Contact, contact_hubspot_id, CONTACT_CRM_PROPERTIES)
            .await?
            .ok_or_else(|| EngineError::ContactNotFound(contact_hubspot_id.to_string()))?;

        // keep the projected uuid stable when the contact is already known
        let uuid = match self.contacts.fetch_by_hubspot_id(contact_hubspot_id).await? {
            Some(existing) => existing.uuid,
            None => Uuid::new_v4(),
        };

        Ok(Contact::from_crm(&record, uuid)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(sj: u32, cs: u32, sjmini: u32, mock_discussion: u32, shared: u32) -> CreditBalance {
        CreditBalance {
            sj,
            cs,
            sjmini,
            mock_discussion,
            shared,
        }
    }

    #[test]
    fn sj_prefers_its_own_pool() {
        let b = balance(2, 0, 0, 0, 5);
        assert_eq!(
            resolve_field(MockType::SituationalJudgment, &b),
            Some(CreditField::Sj)
        );
    }

    #[test]
    fn sj_and_cs_fall_through_to_shared() {
        let b = balance(0, 0, 0, 0, 1);
        assert_eq!(
            resolve_field(MockType::SituationalJudgment, &b),
            Some(CreditField::Shared)
        );
        assert_eq!(
            resolve_field(MockType::ClinicalSkills, &b),
            Some(CreditField::Shared)
        );
    }

    #[test]
    fn mini_mock_never_uses_shared() {
        let b = balance(0, 0, 0, 0, 5);
        assert_eq!(resolve_field(MockType::MiniMock, &b), None);

        let b = balance(0, 0, 1, 0, 0);
        assert_eq!(resolve_field(MockType::MiniMock, &b), Some(CreditField::Sjmini));
    }

    #[test]
    fn mock_discussion_never_uses_shared() {
        let b = balance(0, 0, 0, 0, 9);
        assert_eq!(resolve_field(MockType::MockDiscussion, &b), None);
    }

    #[test]
    fn empty_pools_resolve_to_none() {
        let b = balance(0, 0, 0, 0, 0);
        for mt in [
            MockType::SituationalJudgment,
            MockType::ClinicalSkills,
            MockType::MiniMock,
            MockType::MockDiscussion,
        ] {
            assert_eq!(resolve_field(mt, &b), None);
        }
    }

    #[test]
    fn summary_counts_shared_only_where_legal() {
        let b = balance(1, 0, 2, 0, 3);

        let sj = CreditSummary::for_type(MockType::SituationalJudgment, &b);
        assert_eq!((sj.specific, sj.shared, sj.available), (1, 3, 4));
        assert!(sj.eligible);

        let mini = CreditSummary::for_type(MockType::MiniMock, &b);
        assert_eq!((mini.specific, mini.shared, mini.available), (2, 3, 2));
        assert!(mini.eligible);

        let md = CreditSummary::for_type(MockType::MockDiscussion, &b);
        assert_eq!(md.available, 0);
        assert!(!md.eligible);
    }
}
