use async_trait::async_trait;
use uuid::Uuid;

use crate::contact::model::{Contact, CreditField};

/// Fast-store projection of CRM contacts.
#[async_trait]
pub trait ContactRepository: Send + Sync + 'static {
    async fn upsert(&self, contact: &Contact) -> anyhow::Result<()>;

    async fn fetch_by_hubspot_id(&self, hubspot_id: &str) -> anyhow::Result<Option<Contact>>;

    async fn fetch_by_uuid(&self, uuid: &Uuid) -> anyhow::Result<Option<Contact>>;

    /// Project a single credit pool after a ledger write.
    async fn set_credit(
        &self,
        hubspot_id: &str,
        field: CreditField,
        value: u32,
    ) -> anyhow::Result<()>;
}
