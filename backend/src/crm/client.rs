use std::collections::HashMap;

use async_trait::async_trait;

use super::errors::CrmError;
use super::types::{CrmRecord, ObjectType, SearchFilter};

/// Request/response interface to the CRM-of-record.
///
/// Transport, auth, retry-on-429/5xx, and rate-limit backoff live inside the
/// implementation; the engine treats every call as a single atomic attempt.
#[async_trait]
pub trait CrmClient: Send + Sync + 'static {
    async fn get(
        &self,
        ty: ObjectType,
        id: &str,
        properties: &[&str],
    ) -> Result<Option<CrmRecord>, CrmError>;

    async fn create(
        &self,
        ty: ObjectType,
        properties: HashMap<String, String>,
    ) -> Result<CrmRecord, CrmError>;

    async fn update(
        &self,
        ty: ObjectType,
        id: &str,
        properties: HashMap<String, String>,
    ) -> Result<CrmRecord, CrmError>;

    async fn delete(&self, ty: ObjectType, id: &str) -> Result<(), CrmError>;

    async fn search(
        &self,
        ty: ObjectType,
        filters: &[SearchFilter],
        properties: &[&str],
        limit: u32,
    ) -> Result<Vec<CrmRecord>, CrmError>;

    async fn batch_read(
        &self,
        ty: ObjectType,
        ids: &[String],
        properties: &[&str],
    ) -> Result<Vec<CrmRecord>, CrmError>;

    async fn batch_update(
        &self,
        ty: ObjectType,
        updates: Vec<(String, HashMap<String, String>)>,
    ) -> Result<(), CrmError>;

    async fn associate(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
    ) -> Result<(), CrmError>;

    /// Ids of `to`-type objects associated with `from_id`.
    async fn associations_of(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
    ) -> Result<Vec<String>, CrmError>;

    async fn disassociate(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
    ) -> Result<(), CrmError>;
}
